//! The analysis pipeline: fetch, normalize, score, enrich, synthesize.
//!
//! Data flows strictly leaf-to-root: raw thread, comment forest, retained
//! set, enriched set, synthesized report. Only network calls suspend; the
//! tree, scoring, and clustering passes are pure in-memory computation.

pub mod enrichment;
pub mod quality;
pub mod report;
pub mod similarity;
pub mod synthesis;
pub mod tree;

use cache_store::{CacheCategory, CacheKey, CacheStore};
use chrono::Utc;
use enrichment::EnrichmentEngine;
use llm_interface::LlmProvider;
use quality::score_forest;
use reddit_client::{LinkFetcher, OcrEngine, ThreadFetcher, ThreadReference};
use std::time::Instant;
use synthesis::{
    build_compact_input, cluster_insights, cross_validate, extract_claims,
    sentiment_distribution, SynthesisEngine,
};
use threadlens_core::{
    retry_with_backoff, AnalysisConfig, ContentType, CoreError, IntentLabel, Post, RawComment,
    ReportMetadata, RetryConfig, RunWarning, SynthesisReport,
};
use tracing::{info, warn};
use tree::CommentForest;

/// Version tags folded into the fetch-adjacent cache keys.
pub const THREAD_VERSION: &str = "thread-v1";
pub const OCR_VERSION: &str = "ocr-v1";
pub const LINK_VERSION: &str = "link-v1";

/// One configured analysis run over its collaborators. The cache is the
/// only shared-mutable resource.
pub struct Analyzer<'a, F, O, K, L>
where
    F: ThreadFetcher,
    O: OcrEngine,
    K: LinkFetcher,
    L: LlmProvider,
{
    fetcher: &'a F,
    ocr: &'a O,
    links: &'a K,
    llm: &'a L,
    cache: &'a CacheStore,
    config: AnalysisConfig,
    retry: RetryConfig,
}

impl<'a, F, O, K, L> Analyzer<'a, F, O, K, L>
where
    F: ThreadFetcher,
    O: OcrEngine,
    K: LinkFetcher,
    L: LlmProvider,
{
    pub fn new(
        fetcher: &'a F,
        ocr: &'a O,
        links: &'a K,
        llm: &'a L,
        cache: &'a CacheStore,
        config: AnalysisConfig,
    ) -> Self {
        Self {
            fetcher,
            ocr,
            links,
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

    /// Run the full pipeline. Only configuration errors and a failed post
    /// fetch are fatal; everything downstream degrades into warnings.
    pub async fn analyze(
        &self,
        reference: &ThreadReference,
    ) -> Result<SynthesisReport, CoreError> {
        self.config.validate()?;
        let started = Instant::now();
        let mut warnings: Vec<RunWarning> = Vec::new();

        let (mut post, raw_comments) = self.fetch_thread(reference).await?;
        info!(
            "Analyzing thread {} (r/{}, {} raw comments)",
            post.id,
            post.subreddit,
            raw_comments.len()
        );

        self.assemble_body(&mut post, &mut warnings).await;

        let forest = CommentForest::build(&post.id, &raw_comments, &mut warnings)?;
        let outcome = score_forest(&forest, &self.config);

        // Post and comment enrichment share one run-level budget; the
        // synthesis call gets its own allowance inside the engine so that
        // completed work still reduces to a report after a timeout here
        let deadline = Instant::now() + self.config.run_timeout();
        let enricher =
            EnrichmentEngine::new(self.llm, self.cache, &self.config).with_retry(self.retry.clone());
        let enriched_post = enricher
            .enrich_post(
                &post,
                deadline.saturating_duration_since(Instant::now()),
                &mut warnings,
            )
            .await;
        let post_context = enriched_post
            .enrichment
            .as_ref()
            .map(|e| e.summary.clone())
            .unwrap_or_else(|| post.title.clone());
        let enriched_comments = enricher
            .enrich_comments(
                &forest,
                &outcome,
                &post_context,
                deadline.saturating_duration_since(Instant::now()),
                &mut warnings,
            )
            .await;

        let claims = extract_claims(&post.body);
        let support = cross_validate(&claims, &enriched_comments);
        let insights = cluster_insights(&enriched_comments, &self.config);
        let distribution = sentiment_distribution(&enriched_comments);

        let compact = build_compact_input(&support, &insights, &distribution);
        let synthesizer =
            SynthesisEngine::new(self.llm, self.cache, &self.config).with_retry(self.retry.clone());
        let draft = synthesizer.executive_summary(&compact, &mut warnings).await;

        let recommended_actions = match &draft {
            Some(d) if !d.recommended_actions.is_empty() => d.recommended_actions.clone(),
            _ => insights
                .iter()
                .filter(|i| i.intent == IntentLabel::Solution)
                .map(|i| i.title.clone())
                .collect(),
        };

        let comments_enriched = enriched_comments
            .iter()
            .filter(|c| !c.enrichment_failed)
            .count();

        Ok(SynthesisReport {
            metadata: ReportMetadata {
                post_id: post.id.clone(),
                subreddit: post.subreddit.clone(),
                permalink: post.permalink.clone(),
                post_score: post.score,
                analyzed_at: Utc::now(),
                duration_seconds: started.elapsed().as_secs_f64(),
                comments_total: forest.len(),
                comments_retained: outcome.retained.len(),
                comments_enriched,
            },
            executive_summary: draft.map(|d| d.executive_summary),
            claims: support,
            insights,
            recommended_actions,
            sentiment_distribution: distribution,
            warnings,
        })
    }

    /// Fetch the thread, cache-gated so repeat runs within the TTL skip the
    /// network. A fetch failure is the one fatal upstream error.
    async fn fetch_thread(
        &self,
        reference: &ThreadReference,
    ) -> Result<(Post, Vec<RawComment>), CoreError> {
        let key = CacheKey::derive(CacheCategory::Thread, &reference.post_id, THREAD_VERSION);
        let serialized = self
            .cache
            .get_or_compute(&key, self.config.cache_ttl(), || async {
                let thread = retry_with_backoff(&self.retry, "fetch_thread", || {
                    self.fetcher.fetch_thread(reference)
                })
                .await?;
                Ok(serde_json::to_string(&thread)?)
            })
            .await?;
        Ok(serde_json::from_str(&serialized)?)
    }

    /// Assemble the analyzable post body from selftext plus whatever the
    /// OCR/link collaborators can contribute. Never fatal: a post with no
    /// extractable content degrades to title-only analysis.
    async fn assemble_body(&self, post: &mut Post, warnings: &mut Vec<RunWarning>) {
        let mut parts: Vec<String> = Vec::new();
        if !post.selftext.trim().is_empty() {
            parts.push(post.selftext.trim().to_string());
        }

        match post.content_type {
            ContentType::Text => {}
            ContentType::Image | ContentType::Gallery => {
                let key = CacheKey::derive(CacheCategory::Ocr, &post.url, OCR_VERSION);
                let ttl = self.config.cache_ttl();
                match self
                    .cache
                    .get_or_compute(&key, ttl, || self.ocr.extract_text(&post.url))
                    .await
                {
                    Ok(text) if !text.trim().is_empty() => parts.push(text),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Image text extraction skipped: {}", e);
                        warnings.push(RunWarning::OcrSkipped {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            ContentType::Link => {
                let key = CacheKey::derive(CacheCategory::LinkContent, &post.url, LINK_VERSION);
                let ttl = self.config.cache_ttl();
                match self
                    .cache
                    .get_or_compute(&key, ttl, || async {
                        Ok(self.links.fetch_link(&post.url).await?.text)
                    })
                    .await
                {
                    Ok(text) if !text.trim().is_empty() => parts.push(text),
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Linked article unavailable: {}", e);
                        warnings.push(RunWarning::LinkContentUnavailable {
                            reason: e.to_string(),
                        });
                    }
                }
            }
            ContentType::Video => {
                warnings.push(RunWarning::LinkContentUnavailable {
                    reason: "video content is not analyzed".to_string(),
                });
            }
        }

        // Non-self posts lean on their title for claim extraction
        post.body = if parts.is_empty() {
            post.title.clone()
        } else if post.content_type == ContentType::Text {
            parts.join("\n\n")
        } else {
            format!("{}\n\n{}", post.title, parts.join("\n\n"))
        };
    }
}
