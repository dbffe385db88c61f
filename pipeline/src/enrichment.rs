//! Enrichment fan-out: attach model-derived signals to the post and the
//! retained comment set, gated through the cache.
//!
//! Failures here never abort the run. A batch failure falls back to
//! per-item calls, a schema violation earns one stricter re-prompt, and a
//! phase timeout keeps whatever completed.

use crate::quality::QualityOutcome;
use crate::tree::CommentForest;
use cache_store::{CacheCategory, CacheKey, CacheStore};
use futures::StreamExt;
use llm_interface::LlmProvider;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use threadlens_core::{
    retry_with_backoff, AnalysisConfig, CommentBatchRequest, CommentEnrichment,
    CommentForEnrichment, CoreError, EnrichedComment, EnrichedPost, LlmError, Post,
    PostEnrichment, PostEnrichmentRequest, RetryConfig, RunWarning,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Version tag folded into enrichment cache keys. Bump when the prompt or
/// output schema changes.
pub const ENRICHMENT_VERSION: &str = "enrich-v1";

pub struct EnrichmentEngine<'a, L: LlmProvider> {
    llm: &'a L,
    cache: &'a CacheStore,
    config: &'a AnalysisConfig,
    retry: RetryConfig,
}

impl<'a, L: LlmProvider> EnrichmentEngine<'a, L> {
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

    fn post_key(post: &Post) -> CacheKey {
        CacheKey::derive(CacheCategory::PostEnrichment, &post.body, ENRICHMENT_VERSION)
    }

    fn comment_key(body: &str) -> CacheKey {
        CacheKey::derive(CacheCategory::CommentEnrichment, body, ENRICHMENT_VERSION)
    }

    /// Enrich the post within the remaining phase budget. Failure or an
    /// exhausted budget degrades to `enrichment_failed` with a recorded
    /// warning.
    pub async fn enrich_post(
        &self,
        post: &Post,
        budget: Duration,
        warnings: &mut Vec<RunWarning>,
    ) -> EnrichedPost {
        let key = Self::post_key(post);

        if let Some(cached) = self.cache.get_degraded(&key).await {
            if let Ok(enrichment) = serde_json::from_str::<PostEnrichment>(&cached) {
                debug!("Post {} enrichment served from cache", post.id);
                return EnrichedPost {
                    post_id: post.id.clone(),
                    content_hash: key.as_str().to_string(),
                    enrichment: Some(enrichment),
                    enrichment_failed: false,
                };
            }
        }

        let request = PostEnrichmentRequest {
            title: post.title.clone(),
            subreddit: post.subreddit.clone(),
            body: post.body.clone(),
            strict: false,
        };

        let attempt =
            tokio::time::timeout(budget, self.call_post_with_strict_retry(&request)).await;
        match attempt {
            Err(_) => {
                warn!("Post enrichment timed out for {}", post.id);
                warnings.push(RunWarning::EnrichmentTimedOut {
                    unit_id: post.id.clone(),
                });
                EnrichedPost {
                    post_id: post.id.clone(),
                    content_hash: key.as_str().to_string(),
                    enrichment: None,
                    enrichment_failed: true,
                }
            }
            Ok(Ok(enrichment)) => {
                if let Ok(serialized) = serde_json::to_string(&enrichment) {
                    self.cache
                        .put_degraded(&key, &serialized, self.config.cache_ttl())
                        .await;
                }
                EnrichedPost {
                    post_id: post.id.clone(),
                    content_hash: key.as_str().to_string(),
                    enrichment: Some(enrichment),
                    enrichment_failed: false,
                }
            }
            Ok(Err(e)) => {
                warn!("Post enrichment failed for {}: {}", post.id, e);
                warnings.push(RunWarning::EnrichmentFailed {
                    unit_id: post.id.clone(),
                });
                EnrichedPost {
                    post_id: post.id.clone(),
                    content_hash: key.as_str().to_string(),
                    enrichment: None,
                    enrichment_failed: true,
                }
            }
        }
    }

    /// Enrich the retained set with bounded-concurrency batched calls under
    /// the remaining phase budget. Always returns one record per retained
    /// id, in retained-rank order.
    pub async fn enrich_comments(
        &self,
        forest: &CommentForest,
        outcome: &QualityOutcome,
        post_context: &str,
        budget: Duration,
        warnings: &mut Vec<RunWarning>,
    ) -> Vec<EnrichedComment> {
        let results: Arc<Mutex<HashMap<String, CommentEnrichment>>> =
            Arc::new(Mutex::new(HashMap::new()));
        let failures: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

        // Resolve cache hits up front; only misses go to the model
        let mut uncached: Vec<CommentForEnrichment> = Vec::new();
        let mut key_by_id: HashMap<String, CacheKey> = HashMap::new();
        for id in &outcome.retained {
            let Some(node) = forest.get(id) else { continue };
            let key = Self::comment_key(&node.body);
            if let Some(cached) = self.cache.get_degraded(&key).await {
                if let Ok(enrichment) = serde_json::from_str::<CommentEnrichment>(&cached) {
                    results.lock().await.insert(id.clone(), enrichment);
                    continue;
                }
            }
            key_by_id.insert(id.clone(), key);
            uncached.push(CommentForEnrichment {
                id: node.id.clone(),
                score: node.score,
                body: node.body.clone(),
            });
        }
        let key_by_id = &key_by_id;

        info!(
            "Enriching {} comments ({} cached)",
            outcome.retained.len(),
            outcome.retained.len() - uncached.len()
        );

        let batches: Vec<Vec<CommentForEnrichment>> = uncached
            .chunks(self.config.enrichment_batch_size)
            .map(<[CommentForEnrichment]>::to_vec)
            .collect();

        let fan_out = futures::stream::iter(batches.into_iter().map(|batch| {
            let results = Arc::clone(&results);
            let failures = Arc::clone(&failures);
            async move {
                self.process_batch(batch, post_context, key_by_id, &results, &failures)
                    .await;
            }
        }))
        .buffer_unordered(self.config.enrichment_concurrency)
        .collect::<Vec<()>>();

        let timed_out = tokio::time::timeout(budget, fan_out).await.is_err();
        if timed_out {
            warn!("Enrichment phase timed out; proceeding with partial results");
        }

        let mut results = results.lock().await;
        let failed_ids: HashSet<String> = failures.lock().await.drain(..).collect();

        let mut enriched = Vec::with_capacity(outcome.retained.len());
        for id in &outcome.retained {
            let Some(node) = forest.get(id) else { continue };
            let enrichment = results.remove(id);
            if enrichment.is_none() {
                if failed_ids.contains(id) || !timed_out {
                    warnings.push(RunWarning::EnrichmentFailed {
                        unit_id: id.clone(),
                    });
                } else {
                    warnings.push(RunWarning::EnrichmentTimedOut {
                        unit_id: id.clone(),
                    });
                }
            }
            enriched.push(EnrichedComment {
                comment_id: id.clone(),
                content_hash: Self::comment_key(&node.body).as_str().to_string(),
                quality: outcome.scores[id].quality,
                depth: node.depth,
                upvotes: node.score,
                enrichment_failed: enrichment.is_none(),
                enrichment,
            });
        }
        enriched
    }

    /// One batch: strict-retried batch call, then per-item fallback.
    async fn process_batch(
        &self,
        batch: Vec<CommentForEnrichment>,
        post_context: &str,
        key_by_id: &HashMap<String, CacheKey>,
        results: &Mutex<HashMap<String, CommentEnrichment>>,
        failures: &Mutex<Vec<String>>,
    ) {
        let request = CommentBatchRequest {
            post_context: post_context.to_string(),
            comments: batch.clone(),
            strict: false,
        };

        match self.call_batch_with_strict_retry(&request).await {
            Ok(enrichments) => {
                self.store_results(enrichments, key_by_id, results).await;
            }
            Err(e) => {
                warn!(
                    "Batch of {} comments failed ({}), retrying per item",
                    batch.len(),
                    e
                );
                for comment in batch {
                    let id = comment.id.clone();
                    let single = CommentBatchRequest {
                        post_context: post_context.to_string(),
                        comments: vec![comment],
                        strict: false,
                    };
                    match self.call_batch_with_strict_retry(&single).await {
                        Ok(enrichments) => {
                            self.store_results(enrichments, key_by_id, results).await
                        }
                        Err(e) => {
                            warn!("Comment {id} enrichment failed: {e}");
                            failures.lock().await.push(id);
                        }
                    }
                }
            }
        }
    }

    async fn store_results(
        &self,
        enrichments: Vec<CommentEnrichment>,
        key_by_id: &HashMap<String, CacheKey>,
        results: &Mutex<HashMap<String, CommentEnrichment>>,
    ) {
        for enrichment in enrichments {
            if let (Some(key), Ok(serialized)) = (
                key_by_id.get(&enrichment.comment_id),
                serde_json::to_string(&enrichment),
            ) {
                self.cache
                    .put_degraded(key, &serialized, self.config.cache_ttl())
                    .await;
            }
            results
                .lock()
                .await
                .insert(enrichment.comment_id.clone(), enrichment);
        }
    }

    /// Transport and rate-limit failures get backoff retries; a schema
    /// violation gets exactly one stricter re-prompt.
    async fn call_post_with_strict_retry(
        &self,
        request: &PostEnrichmentRequest,
    ) -> Result<PostEnrichment, CoreError> {
        let attempt = retry_with_backoff(&self.retry, "enrich_post", || {
            self.llm.enrich_post(request)
        })
        .await;

        match attempt {
            Err(CoreError::Llm(LlmError::InvalidResponse { .. })) => {
                debug!("Post enrichment schema violation, re-prompting strictly");
                let strict = PostEnrichmentRequest {
                    strict: true,
                    ..request.clone()
                };
                self.llm.enrich_post(&strict).await
            }
            other => other,
        }
    }

    async fn call_batch_with_strict_retry(
        &self,
        request: &CommentBatchRequest,
    ) -> Result<Vec<CommentEnrichment>, CoreError> {
        let attempt = retry_with_backoff(&self.retry, "enrich_comments", || {
            self.llm.enrich_comments(request)
        })
        .await;

        match attempt {
            Err(CoreError::Llm(LlmError::InvalidResponse { .. })) => {
                debug!("Comment batch schema violation, re-prompting strictly");
                let strict = CommentBatchRequest {
                    strict: true,
                    ..request.clone()
                };
                self.llm.enrich_comments(&strict).await
            }
            other => other,
        }
    }
}
