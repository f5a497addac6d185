#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct Stats {
    total_tokens: u64,
    prompt_tokens: u64,
    response_tokens: u64,
}

impl Stats {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn update_usage(&mut self, total: u32, prompt: u32, response: u32) {
        self.total_tokens += u64::from(total);
        self.prompt_tokens += u64::from(prompt);
        self.response_tokens += u64::from(response);
    }

    pub fn total_tokens(&self) -> u64 {
        self.total_tokens
    }

    pub fn prompt_tokens(&self) -> u64 {
        self.prompt_tokens
    }

    pub fn response_tokens(&self) -> u64 {
        self.response_tokens
    }
}
