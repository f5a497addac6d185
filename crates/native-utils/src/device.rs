use anyhow::Context;
use cpal::Device;
use cpal::traits::{DeviceTrait, HostTrait};

fn get_host() -> cpal::Host {
    cpal::default_host()
}

//takes an optional device name and finds that input device,
//or falls back to the default input device of the host
pub fn get_or_default_input(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();
    tracing::debug!("Host: {:?}", host.id());

    let Some(target) = device_name else {
        return host
            .default_input_device()
            .context("No default input device");
    };

    let mut input_devices = host
        .input_devices()
        .context("Failed to enumerate input devices")?;
    input_devices
        .find(|device| device.name().is_ok_and(|name| name == target))
        .with_context(|| format!("No input device named {:?}", target))
}

//does the same as the input device above
pub fn get_or_default_output(device_name: Option<String>) -> anyhow::Result<Device> {
    let host = get_host();

    let Some(target) = device_name else {
        return host
            .default_output_device()
            .context("No default output device");
    };

    let mut output_devices = host
        .output_devices()
        .context("Failed to enumerate output devices")?;
    output_devices
        .find(|device| device.name().is_ok_and(|name| name == target))
        .with_context(|| format!("No output device named {:?}", target))
}

pub fn get_available_inputs() -> anyhow::Result<String> {
    for host in cpal::available_hosts() {
        tracing::debug!("Available host: {:?}", host);
    }

    let host = get_host();
    let default_device = host
        .default_input_device()
        .and_then(|device| device.name().ok());

    let mut device_names: Vec<String> = Vec::new();
    for in_device in host.input_devices().context("No input devices found")? {
        let Ok(d_name) = in_device.name() else {
            continue;
        };
        let d_cfg = match in_device.default_input_config() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::debug!("Skipping input {}: {}", d_name, e);
                continue;
            }
        };
        device_names.push(describe(&d_name, d_cfg.channels(), d_cfg.sample_rate().0, default_device.as_deref()));
    }
    Ok(device_names.join("\n"))
}

//does the same as the input function above
pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = get_host();
    let default_device = host
        .default_output_device()
        .and_then(|device| device.name().ok());

    let mut device_names: Vec<String> = Vec::new();
    for out_device in host.output_devices().context("No output devices found")? {
        let Ok(d_name) = out_device.name() else {
            continue;
        };
        let d_cfg = match out_device.default_output_config() {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::debug!("Skipping output {}: {}", d_name, e);
                continue;
            }
        };
        device_names.push(describe(&d_name, d_cfg.channels(), d_cfg.sample_rate().0, default_device.as_deref()));
    }
    Ok(device_names.join("\n"))
}

fn describe(name: &str, channels: u16, sample_rate: u32, default_device: Option<&str>) -> String {
    let mut d = format!(" * {}({}ch, {}hz)", name, channels, sample_rate);
    if default_device == Some(name) {
        d.push_str(" [default]");
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_marks_default_device() {
        assert_eq!(
            describe("Built-in Microphone", 1, 48000, Some("Built-in Microphone")),
            " * Built-in Microphone(1ch, 48000hz) [default]"
        );
        assert_eq!(
            describe("USB Headset", 2, 44100, Some("Built-in Microphone")),
            " * USB Headset(2ch, 44100hz)"
        );
    }
}
