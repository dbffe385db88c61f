//! Per-node quality scoring and retained-set selection.
//!
//! Quality is a weighted blend of four [0,1] components: saturating body
//! length, sibling-relative upvote score, reply count, and novelty against
//! already-higher-ranked siblings and ancestors. Removed nodes carry no
//! textual signal and are never scored or retained.

use crate::similarity::{jaccard, tokens};
use crate::tree::CommentForest;
use std::collections::{BTreeSet, HashMap};
use threadlens_core::{AnalysisConfig, QualityComponents};
use tracing::debug;

const WEIGHT_LENGTH: f64 = 0.35;
const WEIGHT_SCORE: f64 = 0.30;
const WEIGHT_REPLIES: f64 = 0.15;
const WEIGHT_NOVELTY: f64 = 0.20;

/// A scored node: its component breakdown and final quality in [0,10].
#[derive(Debug, Clone)]
pub struct ScoredComment {
    pub id: String,
    pub components: QualityComponents,
    pub quality: f64,
}

/// Output of the quality pass: every scorable node annotated, plus the
/// ranked retained set selected for enrichment.
#[derive(Debug, Clone)]
pub struct QualityOutcome {
    pub scores: HashMap<String, ScoredComment>,
    /// Ids in final rank order, bounded by the configured maximum
    pub retained: Vec<String>,
}

/// Score every non-removed node and select the retained set.
///
/// Novelty is evaluated in base-rank order against nodes already accepted
/// as higher-ranked, so a low-ranked duplicate never penalizes the original
/// and dropping the lowest-ranked node cannot change anyone else's penalty.
pub fn score_forest(forest: &CommentForest, config: &AnalysisConfig) -> QualityOutcome {
    let mut candidates: Vec<&threadlens_core::CommentNode> =
        forest.iter().filter(|n| !n.is_removed).collect();

    // Base rank (pre-novelty) fixes the order novelty is evaluated in
    let base: HashMap<&str, f64> = candidates
        .iter()
        .map(|n| {
            let b = WEIGHT_LENGTH * length_norm(&n.body, config.length_ceiling_words)
                + WEIGHT_SCORE * score_norm(n, forest)
                + WEIGHT_REPLIES * reply_norm(n.children.len());
            (n.id.as_str(), b)
        })
        .collect();
    sort_ranked(&mut candidates, |id| base[id]);

    let token_sets: HashMap<&str, BTreeSet<String>> = candidates
        .iter()
        .map(|n| (n.id.as_str(), tokens(&n.body)))
        .collect();

    let mut scores: HashMap<String, ScoredComment> = HashMap::with_capacity(candidates.len());
    let mut ranked_so_far: Vec<&str> = Vec::new();

    for node in &candidates {
        let novelty = novelty_for(node, forest, &ranked_so_far, &token_sets, config);
        let components = QualityComponents {
            length_norm: length_norm(&node.body, config.length_ceiling_words),
            score_norm: score_norm(node, forest),
            reply_norm: reply_norm(node.children.len()),
            novelty,
        };
        let quality = (10.0
            * (WEIGHT_LENGTH * components.length_norm
                + WEIGHT_SCORE * components.score_norm
                + WEIGHT_REPLIES * components.reply_norm
                + WEIGHT_NOVELTY * components.novelty))
            .clamp(0.0, 10.0);

        scores.insert(
            node.id.clone(),
            ScoredComment {
                id: node.id.clone(),
                components,
                quality,
            },
        );
        ranked_so_far.push(node.id.as_str());
    }

    // Final selection: threshold, then rank bound
    let mut retained: Vec<&threadlens_core::CommentNode> = candidates
        .iter()
        .copied()
        .filter(|n| scores[&n.id].quality >= config.comment_quality_threshold)
        .collect();
    sort_ranked(&mut retained, |id| scores[id].quality);
    retained.truncate(config.max_comments_process);

    let retained: Vec<String> = retained.into_iter().map(|n| n.id.clone()).collect();
    debug!(
        "Quality pass: {} scored, {} retained",
        scores.len(),
        retained.len()
    );
    QualityOutcome { scores, retained }
}

/// Rank ordering: value descending, then shallower depth, then higher
/// upvote score, then id. Fully deterministic.
fn sort_ranked<'a>(
    nodes: &mut [&'a threadlens_core::CommentNode],
    value: impl Fn(&str) -> f64,
) {
    nodes.sort_by(|a, b| {
        value(&b.id)
            .partial_cmp(&value(&a.id))
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.depth.cmp(&b.depth))
            .then(b.score.cmp(&a.score))
            .then(a.id.cmp(&b.id))
    });
}

/// Saturating length: diminishing returns past the configured word ceiling.
fn length_norm(body: &str, ceiling_words: usize) -> f64 {
    let words = body.split_whitespace().count() as f64;
    1.0 - (-words / ceiling_words.max(1) as f64).exp()
}

/// Upvotes normalized against the sibling distribution: 5 upvotes among
/// siblings averaging 1 outranks 5 upvotes among siblings averaging 50.
fn score_norm(node: &threadlens_core::CommentNode, forest: &CommentForest) -> f64 {
    let own = node.score.max(0) as f64;
    let siblings = forest.siblings(&node.id);
    let sibling_mean = if siblings.is_empty() {
        1.0
    } else {
        let sum: f64 = siblings.iter().map(|s| s.score.max(0) as f64).sum();
        (sum / siblings.len() as f64).max(1.0)
    };
    own / (own + sibling_mean)
}

fn reply_norm(replies: usize) -> f64 {
    let r = replies as f64;
    r / (r + 2.0)
}

/// 1.0 for novel bodies; penalized toward 0 when near-duplicating a
/// higher-ranked sibling or ancestor past the similarity threshold.
fn novelty_for(
    node: &threadlens_core::CommentNode,
    forest: &CommentForest,
    higher_ranked: &[&str],
    token_sets: &HashMap<&str, BTreeSet<String>>,
    config: &AnalysisConfig,
) -> f64 {
    let comparable: BTreeSet<&str> = forest
        .siblings(&node.id)
        .iter()
        .map(|n| n.id.as_str())
        .chain(forest.ancestors(&node.id).iter().map(|n| n.id.as_str()))
        .collect();

    let own_tokens = &token_sets[node.id.as_str()];
    let mut max_similarity: f64 = 0.0;
    for other in higher_ranked {
        if !comparable.contains(other) {
            continue;
        }
        if let Some(other_tokens) = token_sets.get(other) {
            max_similarity = max_similarity.max(jaccard(own_tokens, other_tokens));
        }
    }

    if max_similarity >= config.similarity_threshold {
        1.0 - max_similarity
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use threadlens_core::RawComment;

    fn comment(id: &str, parent: Option<&str>, body: &str, score: i64) -> RawComment {
        RawComment {
            id: id.to_string(),
            parent_id: parent.map(str::to_string),
            author: format!("user_{id}"),
            body: body.to_string(),
            score,
            created_utc: Utc::now(),
            replies: Vec::new(),
        }
    }

    fn forest(raw: &[RawComment]) -> CommentForest {
        let mut warnings = Vec::new();
        CommentForest::build("post1", raw, &mut warnings).unwrap()
    }

    #[test]
    fn test_scores_stay_in_range() {
        let raw = vec![
            comment("a", None, &"word ".repeat(500), 100_000),
            comment("b", None, "", 0),
            comment("c", None, "short", -50),
        ];
        let outcome = score_forest(&forest(&raw), &AnalysisConfig::default());
        for scored in outcome.scores.values() {
            assert!((0.0..=10.0).contains(&scored.quality));
        }
        // Removed (empty-body) node is not scored at all
        assert!(!outcome.scores.contains_key("b"));
    }

    #[test]
    fn test_sibling_relative_score_normalization() {
        // 5 upvotes among low-scoring siblings...
        let humble = vec![
            comment("a", None, "five upvotes among ones", 5),
            comment("b", None, "one upvote sibling here", 1),
            comment("c", None, "another single upvote body", 1),
        ];
        // ...versus the same 5 upvotes among high scorers
        let crowded = vec![
            comment("a", None, "five upvotes among fifties", 5),
            comment("b", None, "fifty upvote sibling here", 50),
            comment("c", None, "another fifty upvote body", 50),
        ];
        let humble_outcome = score_forest(&forest(&humble), &AnalysisConfig::default());
        let crowded_outcome = score_forest(&forest(&crowded), &AnalysisConfig::default());
        assert!(
            humble_outcome.scores["a"].components.score_norm
                > crowded_outcome.scores["a"].components.score_norm
        );
    }

    #[test]
    fn test_length_saturates() {
        let short = length_norm(&"word ".repeat(10), 120);
        let long = length_norm(&"word ".repeat(200), 120);
        let longer = length_norm(&"word ".repeat(400), 120);
        assert!(long > short);
        // Past the ceiling the gain flattens out
        assert!((longer - long) < (long - short) / 4.0);
    }

    #[test]
    fn test_near_duplicate_sibling_is_penalized() {
        let body = "You should feed the starter twice a day and keep it somewhere warm";
        let raw = vec![
            comment("orig", None, body, 40),
            comment("dupe", None, &format!("{body}!!"), 2),
            comment("other", None, "Completely different point about hydration ratios", 15),
        ];
        let outcome = score_forest(&forest(&raw), &AnalysisConfig::default());

        assert_eq!(outcome.scores["orig"].components.novelty, 1.0);
        assert!(outcome.scores["dupe"].components.novelty < 0.2);
        assert_eq!(outcome.scores["other"].components.novelty, 1.0);
    }

    #[test]
    fn test_duplicate_across_subtrees_not_penalized() {
        // Same body but neither sibling nor ancestor of the other
        let body = "Try a lower hydration dough for your first attempts";
        let raw = vec![
            comment("a", None, "parent one discussion thread", 10),
            comment("b", Some("a"), body, 5),
            comment("c", None, "parent two discussion thread", 10),
            comment("d", Some("c"), body, 3),
        ];
        let outcome = score_forest(&forest(&raw), &AnalysisConfig::default());
        assert_eq!(outcome.scores["b"].components.novelty, 1.0);
        assert_eq!(outcome.scores["d"].components.novelty, 1.0);
    }

    #[test]
    fn test_retained_set_is_bounded_and_ranked() {
        let mut raw = Vec::new();
        for i in 0..30 {
            raw.push(comment(
                &format!("c{i:02}"),
                None,
                &format!("a sufficiently long and unique body about topic number {i} with detail"),
                i,
            ));
        }
        let config = AnalysisConfig {
            max_comments_process: 10,
            comment_quality_threshold: 0.5,
            ..Default::default()
        };
        let outcome = score_forest(&forest(&raw), &config);

        assert_eq!(outcome.retained.len(), 10);
        // Ranked descending by quality
        for pair in outcome.retained.windows(2) {
            assert!(outcome.scores[&pair[0]].quality >= outcome.scores[&pair[1]].quality);
        }
    }

    #[test]
    fn test_threshold_excludes_low_quality() {
        let raw = vec![
            comment("good", None, &"substantial content ".repeat(30), 80),
            comment("bad", None, "meh", 0),
        ];
        let config = AnalysisConfig {
            comment_quality_threshold: 3.0,
            ..Default::default()
        };
        let outcome = score_forest(&forest(&raw), &config);
        assert!(outcome.retained.contains(&"good".to_string()));
        assert!(!outcome.retained.contains(&"bad".to_string()));
        // Excluded nodes are still scored for structural context
        assert!(outcome.scores.contains_key("bad"));
    }

    #[test]
    fn test_ranking_is_deterministic() {
        let raw = vec![
            comment("a", None, "identical body text for tie", 5),
            comment("b", None, "identical body text for tie", 5),
        ];
        let config = AnalysisConfig::default();
        let first = score_forest(&forest(&raw), &config);
        let second = score_forest(&forest(&raw), &config);
        assert_eq!(first.retained, second.retained);
    }
}
