//! Summarization and embedding capabilities.
//!
//! Both are external calls the engine awaits in sequence; timeouts and
//! retries belong to the implementation, not the engine.

use crate::Result;
use async_trait::async_trait;
use tracing::warn;

/// Compresses a rendered chunk into a shorter text
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// `prompt` is the instruction appended after the chunk text
    async fn summarize(&self, text: &str, prompt: &str) -> Result<String>;
}

/// Maps text to a vector for similarity search
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;
}

/// Summarize `text`, falling back to the text itself on failure or an
/// empty result.
pub async fn summarize_or_original(summarizer: &dyn Summarizer, text: &str, prompt: &str) -> String {
    match summarizer.summarize(text, prompt).await {
        Ok(summary) if !summary.trim().is_empty() => summary.trim().to_string(),
        Ok(_) => {
            warn!("Summarizer returned an empty result, keeping original text");
            text.to_string()
        }
        Err(e) => {
            warn!("{}. Keeping original text.", e);
            text.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryError;

    struct Fixed(&'static str);

    #[async_trait]
    impl Summarizer for Fixed {
        async fn summarize(&self, _text: &str, _prompt: &str) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Summarizer for Broken {
        async fn summarize(&self, _text: &str, _prompt: &str) -> Result<String> {
            Err(MemoryError::SummarizationFailed("offline".into()))
        }
    }

    #[tokio::test]
    async fn test_uses_summary() {
        let out = summarize_or_original(&Fixed("  short  "), "long text", "p").await;
        assert_eq!(out, "short");
    }

    #[tokio::test]
    async fn test_falls_back_on_error() {
        let out = summarize_or_original(&Broken, "long text", "p").await;
        assert_eq!(out, "long text");
    }

    #[tokio::test]
    async fn test_falls_back_on_empty() {
        let out = summarize_or_original(&Fixed("\n"), "long text", "p").await;
        assert_eq!(out, "long text");
    }
}
