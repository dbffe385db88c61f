use cache_store::CacheStore;
use clap::{Parser, Subcommand};
use llm_interface::GeminiProvider;
use pipeline::report::write_report;
use pipeline::Analyzer;
use reddit_client::{DisabledOcr, HttpLinkFetcher, RedditThreadClient, ThreadReference};
use std::path::PathBuf;
use threadlens_core::{AnalysisConfig, ConfigError, CoreError};

#[derive(Parser)]
#[command(name = "threadlens", about = "Reddit thread analysis and synthesis")]
struct Cli {
    /// Path to a TOML config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache database path
    #[arg(long, global = true, default_value = "threadlens_cache.db")]
    cache_path: String,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Analyze a single Reddit thread
    Analyze {
        /// Thread URL, shortlink, or bare post id
        url: String,
        /// Bypass the cache for this run
        #[arg(long)]
        no_cache: bool,
        /// Directory for the JSON and Markdown reports
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Analyze every thread listed in a file (one reference per line)
    Batch {
        file: PathBuf,
        #[arg(long)]
        no_cache: bool,
        #[arg(long, default_value = "output")]
        output_dir: PathBuf,
    },
    /// Show cache entry counts per category
    CacheStats,
    /// Remove cache entries
    CacheClear {
        /// Clear everything, not just expired entries
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), CoreError> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "threadlens=debug,pipeline=debug,cache_store=debug,reddit_client=debug,llm_interface=debug"
    } else {
        "threadlens=info,pipeline=info"
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::from_toml_file(path)?,
        None => AnalysisConfig::default(),
    };

    let cache = CacheStore::open(&cli.cache_path).await?;

    match cli.command {
        Command::Analyze {
            url,
            no_cache,
            output_dir,
        } => {
            if no_cache {
                config.cache_ttl_hours = 0.0;
            }
            analyze_one(&url, &config, &cache, &output_dir).await?;
        }
        Command::Batch {
            file,
            no_cache,
            output_dir,
        } => {
            if no_cache {
                config.cache_ttl_hours = 0.0;
            }
            let contents = std::fs::read_to_string(&file)?;
            let references: Vec<&str> = contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .collect();
            tracing::info!("Batch run over {} threads", references.len());

            let mut failures = 0usize;
            for reference in references {
                if let Err(e) = analyze_one(reference, &config, &cache, &output_dir).await {
                    tracing::error!("Analysis of {} failed: {}", reference, e);
                    failures += 1;
                }
            }
            if failures > 0 {
                return Err(CoreError::Internal {
                    message: format!("{failures} thread(s) failed"),
                });
            }
        }
        Command::CacheStats => {
            let stats = cache.stats().await?;
            if stats.entries.is_empty() {
                println!("Cache is empty");
            } else {
                for (category, count) in &stats.entries {
                    println!("{category:>20}: {count}");
                }
                println!("{:>20}: {}", "total", stats.total());
            }
        }
        Command::CacheClear { all } => {
            let removed = if all {
                cache.clear_all().await?
            } else {
                cache.clear_expired().await?
            };
            println!("Removed {removed} cache entries");
        }
    }

    Ok(())
}

async fn analyze_one(
    reference: &str,
    config: &AnalysisConfig,
    cache: &CacheStore,
    output_dir: &std::path::Path,
) -> Result<(), CoreError> {
    let reference = ThreadReference::parse(reference)?;

    let api_key = std::env::var("GEMINI_API_KEY").map_err(|_| {
        ConfigError::MissingField {
            field: "GEMINI_API_KEY".to_string(),
        }
    })?;

    let fetcher = RedditThreadClient::new()?;
    let links = HttpLinkFetcher::new()?;
    let llm = GeminiProvider::new(api_key)?;

    let analyzer = Analyzer::new(&fetcher, &DisabledOcr, &links, &llm, cache, config.clone());
    let report = analyzer.analyze(&reference).await?;

    let (json_path, md_path) = write_report(output_dir, &report)?;
    println!("Report: {} / {}", json_path.display(), md_path.display());
    if let Some(summary) = &report.executive_summary {
        println!("\n{summary}");
    }
    Ok(())
}
