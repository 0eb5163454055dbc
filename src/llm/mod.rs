pub mod gemini;

use crate::error::AnimathResult;

pub use gemini::{GeminiClient, GeminiConfig};

/// A hosted text completion service: one prompt in, one block of text out.
pub trait TextGenerator: Send + Sync {
    fn generate(&self, prompt: &str) -> AnimathResult<String>;

    /// Short label used in logs and status lines.
    fn name(&self) -> &str {
        "text-generator"
    }
}
