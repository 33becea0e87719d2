use anyhow::Result;
use async_trait::async_trait;

// =============================================================================
// CompletionAgent Trait
// =============================================================================

/// A text-in, text-out language model.
///
/// Kept object-safe so callers can hold `Arc<dyn CompletionAgent>` and swap
/// in a scripted agent under test.
#[async_trait]
pub trait CompletionAgent: Send + Sync {
    async fn complete(&self, system: &str, prompt: &str) -> Result<String>;

    fn model_name(&self) -> &str;
}
