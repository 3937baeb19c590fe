//! The seam to the external AI generation provider.

use crate::error::ProviderError;
use crate::types::ArticleId;

/// What the provider is asked to produce for one article.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub article_id: ArticleId,
    pub title_count: u8,
    pub faq_target_count: u8,
}

/// The provider's raw answer plus accounting.
///
/// `content` is the model's text answer, expected to contain one JSON object
/// with `titles`, `seo` and `faqs` keys.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOutput {
    pub content: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// Billed cost when the provider reports it; otherwise priced locally.
    pub cost_usd: Option<f64>,
}

/// One opaque call producing titles, SEO and FAQs together.
///
/// Implementations must be safe to call concurrently for different articles.
#[mockall::automock]
#[async_trait::async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Generates the unified optimization bundle for `request.article_id`.
    ///
    /// # Errors
    ///
    /// `ProviderError::Transient` for failures worth retrying; any other
    /// variant is surfaced to the caller as-is.
    async fn generate(&self, request: &GenerationRequest) -> Result<ProviderOutput, ProviderError>;
}
