//! LLM collaborator seam: enrichment and synthesis calls against a hosted
//! model, plus the response-salvaging JSON parser.

pub mod gemini;
pub mod parse;

pub use gemini::GeminiProvider;
pub use parse::extract_json;

use threadlens_core::{
    CommentBatchRequest, CommentEnrichment, CoreError, PostEnrichment, PostEnrichmentRequest,
    SynthesisDraft, SynthesisRequest,
};

/// The three model operations the pipeline depends on. Implemented by the
/// live provider and by test doubles.
#[allow(async_fn_in_trait)]
pub trait LlmProvider {
    async fn enrich_post(
        &self,
        request: &PostEnrichmentRequest,
    ) -> Result<PostEnrichment, CoreError>;

    async fn enrich_comments(
        &self,
        request: &CommentBatchRequest,
    ) -> Result<Vec<CommentEnrichment>, CoreError>;

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisDraft, CoreError>;
}
