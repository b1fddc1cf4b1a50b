use crate::openai::Usage;

/// What every dialect's `parse_response` produces, consumed by the output
/// path regardless of which upstream family answered.
#[derive(Debug, Clone)]
pub struct UnifiedResponse {
    pub text: String,
    pub usage: Usage,
    pub success: bool,
}

impl UnifiedResponse {
    pub fn clamp_usage(&mut self) {
        // Usage fields are already unsigned; clamping guards against dialects
        // that hand back negative-looking sentinel values over the wire
        // before they're deserialized into signed intermediates.
        self.usage.prompt_tokens = self.usage.prompt_tokens.min(i32::MAX as u32);
        self.usage.completion_tokens = self.usage.completion_tokens.min(i32::MAX as u32);
        self.usage.total_tokens = self.usage.total_tokens.min(i32::MAX as u32);
    }
}
