//! Terminal report rendering: JSON for machines, Markdown for humans.

use std::path::{Path, PathBuf};
use threadlens_core::{CoreError, RunWarning, SupportStatus, SynthesisReport};
use tracing::info;

/// `{post_id}_{timestamp}` stem shared by the JSON and Markdown artifacts.
pub fn output_file_stem(report: &SynthesisReport) -> String {
    format!(
        "{}_{}",
        report.metadata.post_id,
        report.metadata.analyzed_at.format("%Y%m%d_%H%M%S")
    )
}

/// Write the report as `{stem}.json` and `{stem}.md` under `dir`.
pub fn write_report(
    dir: &Path,
    report: &SynthesisReport,
) -> Result<(PathBuf, PathBuf), CoreError> {
    std::fs::create_dir_all(dir)?;
    let stem = output_file_stem(report);

    let json_path = dir.join(format!("{stem}.json"));
    let json = serde_json::to_string_pretty(report)?;
    std::fs::write(&json_path, json)?;

    let md_path = dir.join(format!("{stem}.md"));
    std::fs::write(&md_path, render_markdown(report))?;

    info!("Report written to {}", json_path.display());
    Ok((json_path, md_path))
}

pub fn render_markdown(report: &SynthesisReport) -> String {
    let mut out = String::new();
    let meta = &report.metadata;

    out.push_str(&format!(
        "# Thread Analysis: {}\n\n\
         - Subreddit: r/{}\n\
         - Post score: {}\n\
         - Analyzed: {} ({}s)\n\
         - Comments: {} total, {} retained, {} enriched\n\n",
        meta.post_id,
        meta.subreddit,
        meta.post_score,
        meta.analyzed_at.format("%Y-%m-%d %H:%M:%S UTC"),
        meta.duration_seconds.round(),
        meta.comments_total,
        meta.comments_retained,
        meta.comments_enriched,
    ));

    out.push_str("## Executive Summary\n\n");
    match &report.executive_summary {
        Some(summary) => out.push_str(&format!("{summary}\n\n")),
        None => out.push_str("_Summary generation failed; structured findings below._\n\n"),
    }

    if !report.claims.is_empty() {
        out.push_str("## Claims\n\n");
        for claim in &report.claims {
            let status = match claim.status {
                SupportStatus::Supported => "supported",
                SupportStatus::Disputed => "disputed",
                SupportStatus::Mixed => "mixed",
                SupportStatus::Unverified => "unverified",
            };
            out.push_str(&format!(
                "- **{status}** ({} for / {} against, confidence {:.2}): {}\n",
                claim.supporting.len(),
                claim.disputing.len(),
                claim.confidence,
                claim.claim_text,
            ));
        }
        out.push('\n');
    }

    if !report.insights.is_empty() {
        out.push_str("## Insights\n\n");
        for insight in &report.insights {
            out.push_str(&format!(
                "- [{}] {} (weight {:.2}, from {})\n",
                insight.intent.as_str(),
                insight.title,
                insight.weight,
                insight
                    .supporting_comments
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", "),
            ));
        }
        out.push('\n');
    }

    if !report.recommended_actions.is_empty() {
        out.push_str("## Recommended Actions\n\n");
        for (i, action) in report.recommended_actions.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, action));
        }
        out.push('\n');
    }

    if !report.sentiment_distribution.is_empty() {
        out.push_str("## Sentiment\n\n");
        for (bucket, count) in &report.sentiment_distribution {
            out.push_str(&format!("- {bucket}: {count}\n"));
        }
        out.push('\n');
    }

    if !report.warnings.is_empty() {
        out.push_str("## Warnings\n\n");
        for warning in &report.warnings {
            out.push_str(&format!("- {}\n", describe_warning(warning)));
        }
    }

    out
}

fn describe_warning(warning: &RunWarning) -> String {
    match warning {
        RunWarning::OrphanComment { comment_id } => {
            format!("comment {comment_id} had an unknown parent and was re-rooted")
        }
        RunWarning::EnrichmentFailed { unit_id } => {
            format!("enrichment failed for {unit_id}")
        }
        RunWarning::EnrichmentTimedOut { unit_id } => {
            format!("enrichment timed out for {unit_id}")
        }
        RunWarning::SummaryUnavailable => "executive summary unavailable".to_string(),
        RunWarning::OcrSkipped { reason } => format!("image text skipped: {reason}"),
        RunWarning::LinkContentUnavailable { reason } => {
            format!("linked article unavailable: {reason}")
        }
    }
}
