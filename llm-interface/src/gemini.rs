use crate::parse::extract_json;
use crate::LlmProvider;
use reqwest::Client;
use serde_json::{json, Value};
use std::time::Duration;
use threadlens_core::{
    CommentBatchRequest, CommentEnrichment, CoreError, LlmError, PostEnrichment,
    PostEnrichmentRequest, SynthesisDraft, SynthesisRequest,
};
use tracing::{debug, info, warn};

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const STRICT_SUFFIX: &str = "\n\nIMPORTANT: Your previous response did not match the required \
schema. Respond with ONLY the JSON described above. No markdown fences, no commentary, no \
fields beyond the schema.";

/// Live provider against the Gemini `generateContent` endpoint.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    api_key: String,
    model: String,
    http_client: Client,
}

impl GeminiProvider {
    pub fn new(api_key: String) -> Result<Self, CoreError> {
        Self::with_model(api_key, DEFAULT_MODEL.to_string())
    }

    pub fn with_model(api_key: String, model: String) -> Result<Self, CoreError> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| LlmError::Transport {
                message: e.to_string(),
            })?;
        info!("Gemini provider initialized with model {model}");
        Ok(Self {
            api_key,
            model,
            http_client,
        })
    }

    async fn generate(&self, prompt: &str) -> Result<String, CoreError> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            GEMINI_API_BASE, self.model, self.api_key
        );
        let payload = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            "generationConfig": { "temperature": 0.2 }
        });

        let response = self
            .http_client
            .post(&url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    CoreError::Llm(LlmError::RequestTimeout)
                } else {
                    CoreError::Llm(LlmError::Transport {
                        message: e.to_string(),
                    })
                }
            })?;

        let status = response.status();
        if status.as_u16() == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(30);
            warn!("Gemini rate limit hit, retry after {retry_after}s");
            return Err(CoreError::Llm(LlmError::RateLimitExceeded { retry_after }));
        }
        if status.is_server_error() {
            return Err(CoreError::Llm(LlmError::ServerError {
                status_code: status.as_u16(),
            }));
        }
        if !status.is_success() {
            return Err(CoreError::Llm(LlmError::InvalidResponse {
                details: format!("unexpected status {}", status.as_u16()),
            }));
        }

        let body: Value = response.json().await.map_err(|e| {
            CoreError::Llm(LlmError::InvalidResponse {
                details: e.to_string(),
            })
        })?;

        let text = body
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(Value::as_str)
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(CoreError::Llm(LlmError::EmptyResponse));
        }
        debug!("Gemini returned {} chars", text.len());
        Ok(text.to_string())
    }
}

impl LlmProvider for GeminiProvider {
    async fn enrich_post(
        &self,
        request: &PostEnrichmentRequest,
    ) -> Result<PostEnrichment, CoreError> {
        let prompt = post_prompt(request);
        let text = self.generate(&prompt).await?;
        let value = extract_json(&text)?;
        parse_post_enrichment(value)
    }

    async fn enrich_comments(
        &self,
        request: &CommentBatchRequest,
    ) -> Result<Vec<CommentEnrichment>, CoreError> {
        let prompt = comments_prompt(request);
        let text = self.generate(&prompt).await?;
        let value = extract_json(&text)?;
        parse_comment_enrichments(value, request)
    }

    async fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisDraft, CoreError> {
        let prompt = synthesis_prompt(request);
        let text = self.generate(&prompt).await?;
        let value = extract_json(&text)?;
        let draft: SynthesisDraft = serde_json::from_value(value).map_err(|e| {
            CoreError::Llm(LlmError::InvalidResponse {
                details: format!("synthesis schema mismatch: {e}"),
            })
        })?;
        if draft.executive_summary.trim().is_empty() {
            return Err(CoreError::Llm(LlmError::InvalidResponse {
                details: "empty executive_summary".to_string(),
            }));
        }
        Ok(draft)
    }
}

fn post_prompt(request: &PostEnrichmentRequest) -> String {
    let mut prompt = format!(
        "You are analyzing a Reddit post. Extract and structure the following information.\n\n\
         SUBREDDIT: {}\nTITLE: {}\n\nPOST CONTENT:\n{}\n\n\
         Return a JSON object with this exact structure:\n\
         {{\n\
           \"entities\": [\"named people, organizations, products, or places mentioned\"],\n\
           \"sentiment\": [{{\"target\": \"entity name\", \"score\": -1.0 to 1.0}}],\n\
           \"intent\": \"supportive|solution|explanatory|anecdotal|humorous|critical|questioning\",\n\
           \"summary\": \"2-3 sentence summary of the post\"\n\
         }}\n\n\
         Respond with ONLY the JSON object, no additional text.",
        request.subreddit, request.title, request.body
    );
    if request.strict {
        prompt.push_str(STRICT_SUFFIX);
    }
    prompt
}

fn comments_prompt(request: &CommentBatchRequest) -> String {
    let mut comments_text = String::new();
    for comment in &request.comments {
        comments_text.push_str(&format!(
            "[id: {} | score: {}]\n{}\n\n",
            comment.id, comment.score, comment.body
        ));
    }

    let mut prompt = format!(
        "Analyze these Reddit comments in the context of the original post.\n\n\
         POST SUMMARY: {}\n\nCOMMENTS (with scores):\n{}\
         For EACH comment, return an element in a JSON array with this structure:\n\
         [\n\
           {{\n\
             \"comment_id\": \"the id given above\",\n\
             \"entities\": [\"named entities mentioned\"],\n\
             \"sentiment\": [{{\"target\": \"entity name\", \"score\": -1.0 to 1.0}}],\n\
             \"sentiment_toward_post\": -1.0 to 1.0,\n\
             \"intent\": \"supportive|solution|explanatory|anecdotal|humorous|critical|questioning\",\n\
             \"summary\": \"one sentence summary of the comment\"\n\
           }}\n\
         ]\n\n\
         Every comment id listed above must appear exactly once.\n\
         Respond with ONLY the JSON array, no additional text.",
        request.post_context, comments_text
    );
    if request.strict {
        prompt.push_str(STRICT_SUFFIX);
    }
    prompt
}

fn synthesis_prompt(request: &SynthesisRequest) -> String {
    let mut prompt = format!(
        "Write the final summary of an analyzed Reddit discussion. You are given the \
         extracted claims with their community support status, the ranked discussion \
         themes, and the sentiment distribution. Do not invent facts beyond this input.\n\n\
         ANALYSIS INPUT:\n{}\n\n\
         Generate a JSON object:\n\
         {{\n\
           \"executive_summary\": \"2-3 sentence overview naming what the community \
         validated, disputed, and recommended\",\n\
           \"recommended_actions\": [\"prioritized list of 3-5 concrete actions drawn \
         from the solution themes - never use N/A\"]\n\
         }}\n\n\
         Respond with ONLY the JSON object, no additional text.",
        request.compact_input
    );
    if request.strict {
        prompt.push_str(STRICT_SUFFIX);
    }
    prompt
}

fn parse_post_enrichment(value: Value) -> Result<PostEnrichment, CoreError> {
    serde_json::from_value(value).map_err(|e| {
        CoreError::Llm(LlmError::InvalidResponse {
            details: format!("post enrichment schema mismatch: {e}"),
        })
    })
}

/// Decode and validate a comment batch response: every requested id must be
/// present exactly once, and sentiment scores are clamped into range.
fn parse_comment_enrichments(
    value: Value,
    request: &CommentBatchRequest,
) -> Result<Vec<CommentEnrichment>, CoreError> {
    let mut enrichments: Vec<CommentEnrichment> =
        serde_json::from_value(value).map_err(|e| {
            CoreError::Llm(LlmError::InvalidResponse {
                details: format!("comment enrichment schema mismatch: {e}"),
            })
        })?;

    for enrichment in &mut enrichments {
        enrichment.clamp_scores();
    }

    for requested in &request.comments {
        let occurrences = enrichments
            .iter()
            .filter(|e| e.comment_id == requested.id)
            .count();
        if occurrences != 1 {
            return Err(CoreError::Llm(LlmError::InvalidResponse {
                details: format!(
                    "comment {} appeared {} times in response",
                    requested.id, occurrences
                ),
            }));
        }
    }

    Ok(enrichments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use threadlens_core::CommentForEnrichment;

    fn batch_request() -> CommentBatchRequest {
        CommentBatchRequest {
            post_context: "A question about sourdough starters.".to_string(),
            comments: vec![
                CommentForEnrichment {
                    id: "c1".to_string(),
                    score: 45,
                    body: "Feed it twice a day.".to_string(),
                },
                CommentForEnrichment {
                    id: "c2".to_string(),
                    score: 3,
                    body: "Mine died in a week.".to_string(),
                },
            ],
            strict: false,
        }
    }

    #[test]
    fn test_parse_comment_batch_validates_ids() {
        let value = serde_json::json!([
            {
                "comment_id": "c1",
                "entities": [],
                "sentiment": [],
                "sentiment_toward_post": 0.6,
                "intent": "solution",
                "summary": "Feeding schedule advice."
            }
        ]);
        // c2 missing from the response
        let result = parse_comment_enrichments(value, &batch_request());
        assert!(matches!(
            result,
            Err(CoreError::Llm(LlmError::InvalidResponse { .. }))
        ));
    }

    #[test]
    fn test_parse_comment_batch_clamps_scores() {
        let value = serde_json::json!([
            {
                "comment_id": "c1",
                "entities": [],
                "sentiment": [],
                "sentiment_toward_post": 2.5,
                "intent": "solution",
                "summary": "Feeding schedule advice."
            },
            {
                "comment_id": "c2",
                "entities": [],
                "sentiment": [],
                "sentiment_toward_post": -0.4,
                "intent": "anecdotal",
                "summary": "A failed starter."
            }
        ]);
        let parsed = parse_comment_enrichments(value, &batch_request()).unwrap();
        assert_eq!(parsed[0].sentiment_toward_post, 1.0);
    }

    #[test]
    fn test_strict_prompt_carries_reinforcement() {
        let mut request = batch_request();
        request.strict = true;
        assert!(comments_prompt(&request).contains("previous response"));

        request.strict = false;
        assert!(!comments_prompt(&request).contains("previous response"));
    }

    #[test]
    fn test_unknown_intent_falls_back() {
        let value = serde_json::json!({
            "entities": ["Acme"],
            "sentiment": [{"target": "Acme", "score": -0.8}],
            "intent": "ranting",
            "summary": "A complaint about a vendor."
        });
        let parsed = parse_post_enrichment(value).unwrap();
        assert_eq!(parsed.intent, threadlens_core::IntentLabel::Unknown);
    }
}
