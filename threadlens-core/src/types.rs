use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Content type of a post, derived from its URL and flags at fetch time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Image,
    Link,
    Video,
    Gallery,
}

/// A fetched submission. Immutable within a run once its body has been
/// assembled from the selftext or the OCR/link collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    /// Assembled analysis text (selftext, OCR output, or linked-article text).
    pub body: String,
    pub selftext: String,
    pub author: String,
    pub subreddit: String,
    pub score: i64,
    pub created_utc: DateTime<Utc>,
    pub url: String,
    pub permalink: String,
    pub content_type: ContentType,
    pub num_comments: u64,
    pub upvote_ratio: Option<f64>,
}

/// Raw comment record as returned by the fetch collaborator. May be nested
/// (replies populated) or flat (replies empty, parent_id set).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawComment {
    pub id: String,
    /// None = top-level comment (parented to the post)
    pub parent_id: Option<String>,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_utc: DateTime<Utc>,
    #[serde(default)]
    pub replies: Vec<RawComment>,
}

/// A normalized node in the comment forest. Nodes are owned by an arena and
/// reference each other by identifier, never by pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentNode {
    pub id: String,
    pub parent_id: Option<String>,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub created_utc: DateTime<Utc>,
    /// 0 for top-level comments, parent depth + 1 otherwise
    pub depth: usize,
    /// Child identifiers in original arrival order
    pub children: Vec<String>,
    /// Deleted/removed comments keep their structural position but carry no
    /// textual signal.
    pub is_removed: bool,
}

/// Components feeding a node's quality score, each in [0,1].
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityComponents {
    pub length_norm: f64,
    pub score_norm: f64,
    pub reply_norm: f64,
    pub novelty: f64,
}

/// Fixed intent label set for enriched units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    Supportive,
    Solution,
    Explanatory,
    Anecdotal,
    Humorous,
    Critical,
    Questioning,
    #[serde(other)]
    Unknown,
}

impl IntentLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentLabel::Supportive => "supportive",
            IntentLabel::Solution => "solution",
            IntentLabel::Explanatory => "explanatory",
            IntentLabel::Anecdotal => "anecdotal",
            IntentLabel::Humorous => "humorous",
            IntentLabel::Critical => "critical",
            IntentLabel::Questioning => "questioning",
            IntentLabel::Unknown => "unknown",
        }
    }
}

/// Sentiment toward one named target, score in [-1,1].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentimentTarget {
    pub target: String,
    pub score: f64,
}

/// Derived signals for a post, as returned by the LLM collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostEnrichment {
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub sentiment: Vec<SentimentTarget>,
    pub intent: IntentLabel,
    pub summary: String,
}

/// Derived signals for one comment, as returned by the LLM collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommentEnrichment {
    pub comment_id: String,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub sentiment: Vec<SentimentTarget>,
    /// Overall stance toward the post author, in [-1,1]
    #[serde(default)]
    pub sentiment_toward_post: f64,
    pub intent: IntentLabel,
    pub summary: String,
}

impl CommentEnrichment {
    /// Clamp all sentiment scores into [-1,1]; model output occasionally drifts.
    pub fn clamp_scores(&mut self) {
        self.sentiment_toward_post = self.sentiment_toward_post.clamp(-1.0, 1.0);
        for s in &mut self.sentiment {
            s.score = s.score.clamp(-1.0, 1.0);
        }
    }
}

/// An enriched post: the derived signals, or a failure marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedPost {
    pub post_id: String,
    pub content_hash: String,
    pub enrichment: Option<PostEnrichment>,
    pub enrichment_failed: bool,
}

/// An enriched comment from the retained set, carrying its quality score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichedComment {
    pub comment_id: String,
    pub content_hash: String,
    pub quality: f64,
    pub depth: usize,
    pub upvotes: i64,
    pub enrichment: Option<CommentEnrichment>,
    pub enrichment_failed: bool,
}

/// A normalized assertion extracted from the post body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub index: usize,
    pub text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupportStatus {
    Supported,
    Disputed,
    Mixed,
    Unverified,
}

/// Links a claim to the comments that corroborate or contest it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupportRecord {
    pub claim_index: usize,
    pub claim_text: String,
    pub status: SupportStatus,
    pub supporting: Vec<String>,
    pub disputing: Vec<String>,
    pub neutral: Vec<String>,
    /// Confidence weight in [0,1]
    pub confidence: f64,
}

/// A ranked, deduplicated cluster of comment-level opinions or solutions.
/// Every insight cites the comments it was aggregated from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    pub intent: IntentLabel,
    /// Normalized aggregate weight in [0,1]
    pub weight: f64,
    pub supporting_comments: Vec<String>,
}

/// Non-fatal degradations recorded during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RunWarning {
    OrphanComment { comment_id: String },
    EnrichmentFailed { unit_id: String },
    EnrichmentTimedOut { unit_id: String },
    SummaryUnavailable,
    OcrSkipped { reason: String },
    LinkContentUnavailable { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub post_id: String,
    pub subreddit: String,
    pub permalink: String,
    pub post_score: i64,
    pub analyzed_at: DateTime<Utc>,
    pub duration_seconds: f64,
    pub comments_total: usize,
    pub comments_retained: usize,
    pub comments_enriched: usize,
}

/// Terminal artifact of a run. Built once; never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisReport {
    pub metadata: ReportMetadata,
    /// None when summary generation failed after retries; the structured
    /// fields below remain populated.
    pub executive_summary: Option<String>,
    pub claims: Vec<SupportRecord>,
    pub insights: Vec<Insight>,
    pub recommended_actions: Vec<String>,
    pub sentiment_distribution: BTreeMap<String, usize>,
    pub warnings: Vec<RunWarning>,
}

// --- LLM collaborator request/response shapes ---

#[derive(Debug, Clone)]
pub struct PostEnrichmentRequest {
    pub title: String,
    pub subreddit: String,
    pub body: String,
    /// Set for the stricter re-prompt after a schema violation
    pub strict: bool,
}

#[derive(Debug, Clone)]
pub struct CommentForEnrichment {
    pub id: String,
    pub score: i64,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct CommentBatchRequest {
    pub post_context: String,
    pub comments: Vec<CommentForEnrichment>,
    pub strict: bool,
}

#[derive(Debug, Clone)]
pub struct SynthesisRequest {
    /// Compacted representation (claims + top clusters + sentiment histogram),
    /// never raw comment text.
    pub compact_input: String,
    pub strict: bool,
}

/// Structured output of the synthesis LLM call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthesisDraft {
    pub executive_summary: String,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
}
