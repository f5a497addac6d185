//! Gapless sequential playback of decoded segments, with immediate flush on
//! interruption.

use crate::audio::{AudioOutput, AudioSegment, SegmentId};
use std::collections::HashMap;
use std::time::Duration;

/// Where a segment sits on the output clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackWindow {
    pub id: SegmentId,
    pub start: Duration,
    pub end: Duration,
}

pub struct PlaybackScheduler {
    output: Box<dyn AudioOutput>,
    next_start_time: Duration,
    active: HashMap<SegmentId, PlaybackWindow>,
    next_id: SegmentId,
    released: bool,
}

impl PlaybackScheduler {
    pub fn new(output: Box<dyn AudioOutput>) -> Self {
        let next_start_time = output.now();
        Self {
            output,
            next_start_time,
            active: HashMap::new(),
            next_id: 0,
            released: false,
        }
    }

    /// Sample rate segments should be decoded to.
    pub fn sample_rate(&self) -> u32 {
        self.output.sample_rate()
    }

    pub fn next_start_time(&self) -> Duration {
        self.next_start_time
    }

    /// Number of segments scheduled or playing.
    pub fn active_segments(&self) -> usize {
        self.active.len()
    }

    /// Schedules `segment` right after everything already queued, or now if the
    /// queue has drained.
    pub fn enqueue(&mut self, segment: AudioSegment) -> PlaybackWindow {
        self.reap_finished();

        let now = self.output.now();
        let start = self.next_start_time.max(now);
        let end = start + segment.duration();
        let id = self.next_id;
        self.next_id += 1;

        let window = PlaybackWindow { id, start, end };
        self.output.start(id, segment, start);
        self.next_start_time = end;
        self.active.insert(id, window);
        tracing::trace!("scheduled segment {} at {:?}..{:?}", id, start, end);
        window
    }

    /// Stops every pending segment and resets the clock to now.
    pub fn flush(&mut self) -> usize {
        let stopped = self.active.len();
        for (id, _) in self.active.drain() {
            self.output.stop(id);
        }
        self.next_start_time = self.output.now();
        if stopped > 0 {
            tracing::debug!("flushed {} segments", stopped);
        }
        stopped
    }

    /// Forgets segments whose window has ended.
    pub fn reap_finished(&mut self) -> usize {
        let now = self.output.now();
        let before = self.active.len();
        self.active.retain(|_, window| window.end > now);
        before - self.active.len()
    }

    /// Flushes and closes the output device. Later calls do nothing.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.flush();
        self.output.release();
        self.released = true;
    }
}

impl Drop for PlaybackScheduler {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Debug, Default)]
    pub(crate) struct OutputRecord {
        pub now: Duration,
        pub started: Vec<PlaybackWindow>,
        pub stopped: Vec<SegmentId>,
        pub releases: usize,
    }

    /// An output whose clock only moves when the test moves it.
    #[derive(Clone, Default)]
    pub(crate) struct FakeOutput {
        pub record: Arc<Mutex<OutputRecord>>,
    }

    impl FakeOutput {
        pub fn advance(&self, by: Duration) {
            self.record.lock().unwrap().now += by;
        }
    }

    impl AudioOutput for FakeOutput {
        fn sample_rate(&self) -> u32 {
            1000
        }

        fn now(&self) -> Duration {
            self.record.lock().unwrap().now
        }

        fn start(&mut self, id: SegmentId, segment: AudioSegment, at: Duration) {
            self.record.lock().unwrap().started.push(PlaybackWindow {
                id,
                start: at,
                end: at + segment.duration(),
            });
        }

        fn stop(&mut self, id: SegmentId) {
            self.record.lock().unwrap().stopped.push(id);
        }

        fn release(&mut self) {
            self.record.lock().unwrap().releases += 1;
        }
    }

    fn segment(millis: usize) -> AudioSegment {
        AudioSegment::new(vec![0.0; millis], 1000)
    }

    #[test]
    fn test_enqueue_schedules_back_to_back_windows() {
        let output = FakeOutput::default();
        output.advance(Duration::from_millis(40));
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));

        let durations = [120, 80, 200];
        let windows: Vec<PlaybackWindow> = durations
            .iter()
            .map(|&ms| scheduler.enqueue(segment(ms)))
            .collect();

        for pair in windows.windows(2) {
            assert!(pair[0].start <= pair[1].start);
            assert_eq!(pair[0].end, pair[1].start, "no gap and no overlap");
        }
        let span = windows[2].end - windows[0].start;
        assert_eq!(span, Duration::from_millis(400));
        assert_eq!(windows[0].start, Duration::from_millis(40));
        assert_eq!(scheduler.active_segments(), 3);
        assert_eq!(output.record.lock().unwrap().started, windows);
    }

    #[test]
    fn test_enqueue_after_queue_drained_starts_now() {
        let output = FakeOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));

        scheduler.enqueue(segment(100));
        output.advance(Duration::from_millis(500));
        let window = scheduler.enqueue(segment(100));

        assert_eq!(window.start, Duration::from_millis(500));
        // The first segment finished on its own.
        assert_eq!(scheduler.active_segments(), 1);
    }

    #[test]
    fn test_flush_stops_everything_and_resets_clock() {
        let output = FakeOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));

        let first = scheduler.enqueue(segment(300));
        let second = scheduler.enqueue(segment(300));
        output.advance(Duration::from_millis(100));

        assert_eq!(scheduler.flush(), 2);
        assert_eq!(scheduler.active_segments(), 0);
        assert_eq!(scheduler.next_start_time(), Duration::from_millis(100));

        let mut stopped = output.record.lock().unwrap().stopped.clone();
        stopped.sort();
        assert_eq!(stopped, vec![first.id, second.id]);

        let window = scheduler.enqueue(segment(50));
        assert_eq!(window.start, Duration::from_millis(100));
    }

    #[test]
    fn test_reap_and_release() {
        let output = FakeOutput::default();
        let mut scheduler = PlaybackScheduler::new(Box::new(output.clone()));

        scheduler.enqueue(segment(100));
        scheduler.enqueue(segment(100));
        output.advance(Duration::from_millis(150));
        assert_eq!(scheduler.reap_finished(), 1);

        scheduler.release();
        scheduler.release();
        let record = output.record.lock().unwrap();
        assert_eq!(record.releases, 1);
        assert_eq!(record.stopped.len(), 1);
        assert_eq!(scheduler.active_segments(), 0);
    }
}
