//! Synthesis: claim cross-validation, opinion clustering, and the final
//! summary call.
//!
//! Stage one checks each post claim against the enriched comments and
//! records who supports, disputes, or stays neutral. Stage two clusters
//! recurring opinions by entity and intent, merges near-duplicates, and
//! ranks the survivors. Only the compacted result of both stages is sent
//! to the model for the executive summary, never raw comment text.

use crate::similarity::{jaccard, tokens};
use cache_store::{CacheCategory, CacheKey, CacheStore};
use llm_interface::LlmProvider;
use std::collections::{BTreeMap, BTreeSet};
use threadlens_core::{
    retry_with_backoff, AnalysisConfig, Claim, CoreError, EnrichedComment, Insight, IntentLabel,
    LlmError, RetryConfig, RunWarning, SupportRecord, SupportStatus, SynthesisDraft,
    SynthesisRequest,
};
use tracing::{debug, warn};

/// Version tag folded into synthesis cache keys.
pub const SYNTHESIS_VERSION: &str = "synth-v1";

/// Stance past which a comment counts as agreeing or disagreeing rather
/// than neutral.
const STANCE_THRESHOLD: f64 = 0.2;

/// Token overlap past which a comment is considered to address a claim.
const CLAIM_RELEVANCE: f64 = 0.2;

/// Token overlap past which two opinion clusters are the same opinion.
const CLUSTER_SIMILARITY: f64 = 0.3;

/// Split the post body into normalized claims. Fragments too short to
/// assert anything are skipped; indices stay stable across runs.
pub fn extract_claims(body: &str) -> Vec<Claim> {
    body.split(['.', '!', '?', '\n'])
        .map(str::trim)
        .filter(|s| s.split_whitespace().count() >= 4)
        .enumerate()
        .map(|(index, text)| Claim {
            index,
            text: text.to_string(),
        })
        .collect()
}

/// Link each claim to the enriched comments that address it. Claims nobody
/// addresses come back `Unverified` with empty member lists, never dropped.
pub fn cross_validate(claims: &[Claim], comments: &[EnrichedComment]) -> Vec<SupportRecord> {
    claims
        .iter()
        .map(|claim| {
            let claim_tokens = tokens(&claim.text);
            let mut supporting = Vec::new();
            let mut disputing = Vec::new();
            let mut neutral = Vec::new();
            let mut confidence_sum = 0.0;

            for comment in comments {
                let Some(enrichment) = &comment.enrichment else {
                    continue;
                };

                let mut comment_tokens = tokens(&enrichment.summary);
                for entity in &enrichment.entities {
                    comment_tokens.extend(tokens(entity));
                }

                let entity_hit = enrichment
                    .entities
                    .iter()
                    .flat_map(|e| tokens(e))
                    .any(|t| claim_tokens.contains(&t));
                let overlap = jaccard(&claim_tokens, &comment_tokens);
                if !entity_hit && overlap < CLAIM_RELEVANCE {
                    continue;
                }

                // Stance toward a named target the claim mentions wins over
                // the general stance toward the post
                let stance = enrichment
                    .sentiment
                    .iter()
                    .find(|s| tokens(&s.target).iter().any(|t| claim_tokens.contains(t)))
                    .map(|s| s.score)
                    .unwrap_or(enrichment.sentiment_toward_post);

                if stance > STANCE_THRESHOLD {
                    supporting.push(comment.comment_id.clone());
                } else if stance < -STANCE_THRESHOLD {
                    disputing.push(comment.comment_id.clone());
                } else {
                    neutral.push(comment.comment_id.clone());
                }
                confidence_sum += (comment.quality / 10.0) * stance.abs();
            }

            let matched = supporting.len() + disputing.len() + neutral.len();
            let status = match (supporting.is_empty(), disputing.is_empty(), matched) {
                (_, _, 0) => SupportStatus::Unverified,
                (false, true, _) => SupportStatus::Supported,
                (true, false, _) => SupportStatus::Disputed,
                (false, false, _) => SupportStatus::Mixed,
                (true, true, _) => SupportStatus::Unverified,
            };
            let confidence = if matched == 0 {
                0.0
            } else {
                (confidence_sum / (matched as f64 + 2.0)).clamp(0.0, 1.0)
            };

            SupportRecord {
                claim_index: claim.index,
                claim_text: claim.text.clone(),
                status,
                supporting,
                disputing,
                neutral,
                confidence,
            }
        })
        .collect()
}

#[derive(Debug, Clone)]
struct Cluster {
    title: String,
    intent: IntentLabel,
    token_set: BTreeSet<String>,
    members: Vec<String>,
    weight_raw: f64,
}

impl Cluster {
    fn absorb(&mut self, other: Cluster) {
        self.token_set.extend(other.token_set);
        self.members.extend(other.members);
        self.weight_raw += other.weight_raw;
    }
}

/// Cluster comment opinions by intent and token similarity, merge
/// near-duplicate clusters, and rank by aggregate quality. Every returned
/// insight cites the comment ids it aggregates.
pub fn cluster_insights(
    comments: &[EnrichedComment],
    config: &AnalysisConfig,
) -> Vec<Insight> {
    // Greedy seeding in quality order: the best phrasing of an opinion
    // becomes the cluster title
    let mut ordered: Vec<&EnrichedComment> =
        comments.iter().filter(|c| c.enrichment.is_some()).collect();
    ordered.sort_by(|a, b| {
        b.quality
            .partial_cmp(&a.quality)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.comment_id.cmp(&b.comment_id))
    });

    let mut clusters: Vec<Cluster> = Vec::new();
    for comment in ordered {
        let Some(enrichment) = &comment.enrichment else {
            continue;
        };
        let mut token_set = tokens(&enrichment.summary);
        for entity in &enrichment.entities {
            token_set.extend(tokens(entity));
        }

        let joined = clusters.iter_mut().find(|c| {
            c.intent == enrichment.intent && jaccard(&c.token_set, &token_set) >= CLUSTER_SIMILARITY
        });
        match joined {
            Some(cluster) => {
                cluster.token_set.extend(token_set);
                cluster.members.push(comment.comment_id.clone());
                cluster.weight_raw += comment.quality;
            }
            None => clusters.push(Cluster {
                title: enrichment.summary.clone(),
                intent: enrichment.intent,
                token_set,
                members: vec![comment.comment_id.clone()],
                weight_raw: comment.quality,
            }),
        }
    }

    // Merge pass: seeding order can split one opinion across two clusters
    let mut merged: Vec<Cluster> = Vec::new();
    for cluster in clusters {
        let target = merged.iter_mut().find(|c| {
            c.intent == cluster.intent
                && jaccard(&c.token_set, &cluster.token_set) >= CLUSTER_SIMILARITY
        });
        match target {
            Some(existing) => existing.absorb(cluster),
            None => merged.push(cluster),
        }
    }

    merged.sort_by(|a, b| {
        b.weight_raw
            .partial_cmp(&a.weight_raw)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(b.members.len().cmp(&a.members.len()))
            .then(a.title.cmp(&b.title))
    });
    merged.truncate(config.max_insights);

    let max_weight = merged
        .first()
        .map(|c| c.weight_raw)
        .filter(|w| *w > 0.0)
        .unwrap_or(1.0);
    debug!("Clustered opinions into {} insights", merged.len());

    merged
        .into_iter()
        .map(|c| Insight {
            title: c.title,
            intent: c.intent,
            weight: (c.weight_raw / max_weight).clamp(0.0, 1.0),
            supporting_comments: c.members,
        })
        .collect()
}

/// Histogram of comment stances toward the post.
pub fn sentiment_distribution(comments: &[EnrichedComment]) -> BTreeMap<String, usize> {
    let mut histogram = BTreeMap::new();
    for comment in comments {
        let Some(enrichment) = &comment.enrichment else {
            continue;
        };
        let bucket = if enrichment.sentiment_toward_post > STANCE_THRESHOLD {
            "positive"
        } else if enrichment.sentiment_toward_post < -STANCE_THRESHOLD {
            "negative"
        } else {
            "neutral"
        };
        *histogram.entry(bucket.to_string()).or_insert(0) += 1;
    }
    histogram
}

/// The compacted, deduplicated model input: claims with their support
/// status, the ranked insights, and the stance histogram.
pub fn build_compact_input(
    claims: &[SupportRecord],
    insights: &[Insight],
    distribution: &BTreeMap<String, usize>,
) -> String {
    let value = serde_json::json!({
        "claims": claims.iter().map(|c| serde_json::json!({
            "text": c.claim_text,
            "status": c.status,
            "supporting": c.supporting.len(),
            "disputing": c.disputing.len(),
            "confidence": c.confidence,
        })).collect::<Vec<_>>(),
        "insights": insights.iter().map(|i| serde_json::json!({
            "title": i.title,
            "intent": i.intent,
            "weight": i.weight,
            "comments": i.supporting_comments.len(),
        })).collect::<Vec<_>>(),
        "sentiment_distribution": distribution,
    });
    value.to_string()
}

pub struct SynthesisEngine<'a, L: LlmProvider> {
    llm: &'a L,
    cache: &'a CacheStore,
    config: &'a AnalysisConfig,
    retry: RetryConfig,
}

impl<'a, L: LlmProvider> SynthesisEngine<'a, L> {
    pub fn new(llm: &'a L, cache: &'a CacheStore, config: &'a AnalysisConfig) -> Self {
        Self {
            llm,
            cache,
            config,
            retry: RetryConfig::llm(),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Produce the executive summary from the compacted input. The call
    /// runs under its own `run_timeout_seconds` allowance; failure after
    /// the strict re-prompt, or an exhausted allowance, degrades to `None`
    /// with a warning and the structured report fields survive regardless.
    pub async fn executive_summary(
        &self,
        compact_input: &str,
        warnings: &mut Vec<RunWarning>,
    ) -> Option<SynthesisDraft> {
        let key = CacheKey::derive(CacheCategory::Synthesis, compact_input, SYNTHESIS_VERSION);

        if let Some(cached) = self.cache.get_degraded(&key).await {
            if let Ok(draft) = serde_json::from_str::<SynthesisDraft>(&cached) {
                debug!("Executive summary served from cache");
                return Some(draft);
            }
        }

        let request = SynthesisRequest {
            compact_input: compact_input.to_string(),
            strict: false,
        };
        let attempt = tokio::time::timeout(
            self.config.run_timeout(),
            self.call_with_strict_retry(&request),
        )
        .await;
        match attempt {
            Ok(Ok(draft)) => {
                if let Ok(serialized) = serde_json::to_string(&draft) {
                    self.cache
                        .put_degraded(&key, &serialized, self.config.cache_ttl())
                        .await;
                }
                Some(draft)
            }
            Ok(Err(e)) => {
                warn!("Executive summary generation failed: {}", e);
                warnings.push(RunWarning::SummaryUnavailable);
                None
            }
            Err(_) => {
                warn!("Executive summary generation timed out");
                warnings.push(RunWarning::SummaryUnavailable);
                None
            }
        }
    }

    async fn call_with_strict_retry(
        &self,
        request: &SynthesisRequest,
    ) -> Result<SynthesisDraft, CoreError> {
        let attempt = retry_with_backoff(&self.retry, "synthesize", || {
            self.llm.synthesize(request)
        })
        .await;

        match attempt {
            Err(CoreError::Llm(LlmError::InvalidResponse { .. })) => {
                debug!("Synthesis schema violation, re-prompting strictly");
                let strict = SynthesisRequest {
                    strict: true,
                    ..request.clone()
                };
                self.llm.synthesize(&strict).await
            }
            other => other,
        }
    }
}
