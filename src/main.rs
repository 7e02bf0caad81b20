mod config;
mod db;
mod dedup;
mod engine;
mod error;
mod extract;
mod model;
mod normalize;
mod render;
mod schedule;
mod score;

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::warn;

use crate::config::Settings;
use crate::db::{Repository, SqliteStore};
use crate::engine::{current_profile, Engine, EngineOptions};
use crate::extract::cap_chars;
use crate::model::{JobFilter, RunStatus, RunTrigger, ScrapeFrequency, SortBy};
use crate::render::AnyRenderer;

#[derive(Parser)]
#[command(name = "gig_scout", about = "Upwork job listing scraper and scorer")]
struct Cli {
    /// Settings file (default: ./gig_scout.toml if present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the database and store the default profile
    Init,
    /// Scrape, score and store listings once
    Run {
        /// Query URLs (default: query_urls from settings)
        urls: Vec<String>,
        /// Max listings to take across all URLs
        #[arg(short = 'n', long)]
        limit: Option<usize>,
        /// Insert tagged placeholder jobs when nothing is found
        #[arg(long)]
        placeholders: bool,
    },
    /// Run automatically at the profile's scrape frequency until Ctrl-C
    Watch,
    /// Recalculate every stored score against the current profile
    Rescore,
    /// List stored jobs
    Jobs {
        /// Only jobs at or above the profile threshold
        #[arg(long)]
        above: bool,
        #[arg(long, value_enum, default_value = "time")]
        sort: SortBy,
        /// Max rows to display
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,
        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },
    /// Show the latest runs
    Status,
    /// Show job statistics
    Stats,
    /// Show or change the scoring profile
    Profile {
        #[command(subcommand)]
        action: ProfileAction,
    },
}

#[derive(Subcommand)]
enum ProfileAction {
    Show,
    /// Update the profile and rescore stored jobs
    Set {
        /// Comma-separated skills
        #[arg(long, value_delimiter = ',')]
        skills: Option<Vec<String>>,
        #[arg(long)]
        rate_min: Option<i32>,
        #[arg(long)]
        rate_max: Option<i32>,
        /// Relevance cutoff between 0 and 1
        #[arg(long)]
        threshold: Option<f64>,
        /// 5min, 30min or 1hour
        #[arg(long)]
        frequency: Option<ScrapeFrequency>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;
    let store = SqliteStore::open(&settings.db_path)
        .with_context(|| format!("Cannot open database {}", settings.db_path.display()))?;

    let result = match cli.command {
        Commands::Init => {
            if store.get_profile()?.is_none() {
                store.save_profile(&settings.default_profile())?;
                println!("Stored default profile.");
            }
            println!("Database ready at {}", settings.db_path.display());
            Ok(())
        }
        Commands::Run {
            urls,
            limit,
            placeholders,
        } => {
            let urls = if urls.is_empty() {
                settings.query_urls.clone()
            } else {
                urls
            };
            if urls.is_empty() {
                println!("No query URLs. Pass some or set query_urls in the settings.");
                return Ok(());
            }
            let profile = current_profile(&store, &settings)?;
            let mut options = EngineOptions::from_settings(&settings);
            options.placeholders_on_empty |= placeholders;
            let engine = Engine::new(AnyRenderer::from_settings(&settings)?, options, cancel_on_ctrl_c());

            println!("Scraping {} query URL(s)...", urls.len());
            let outcome = engine
                .run_once(
                    &store,
                    &urls,
                    &profile,
                    limit.unwrap_or(settings.max_jobs),
                    RunTrigger::Manual,
                )
                .await;

            if outcome.status == RunStatus::Failed {
                bail!(
                    "Run failed: {}",
                    outcome.error_message.unwrap_or_else(|| "unknown error".into())
                );
            }
            println!("Run {}: {} job(s) found.", outcome.status, outcome.jobs_found);
            Ok(())
        }
        Commands::Watch => {
            let engine = Engine::new(
                AnyRenderer::from_settings(&settings)?,
                EngineOptions::from_settings(&settings),
                cancel_on_ctrl_c(),
            );
            println!("Watching {} query URL(s). Ctrl-C to stop.", settings.query_urls.len());
            let runs = schedule::watch(&engine, &store, &settings).await;
            println!("Stopped after {} run(s).", runs);
            Ok(())
        }
        Commands::Rescore => {
            let profile = current_profile(&store, &settings)?;
            let updated = engine::recalculate_scores(&store, &profile.skills, profile.score_threshold)?;
            println!("Rescored {} job(s).", updated);
            Ok(())
        }
        Commands::Jobs {
            above,
            sort,
            limit,
            json,
        } => {
            let profile = current_profile(&store, &settings)?;
            let jobs = store.list_jobs(&JobFilter {
                above_threshold_only: above,
                threshold: profile.score_threshold,
                sort,
                limit: Some(limit),
            })?;

            if json {
                println!("{}", serde_json::to_string_pretty(&jobs)?);
                return Ok(());
            }
            if jobs.is_empty() {
                println!("No jobs found. Run 'run' first.");
                return Ok(());
            }

            println!(
                "{:>3} | {:>5} | {:<40} | {:<24} | {:<30} | {:<12}",
                "#", "Score", "Title", "Budget", "Skills", "Type"
            );
            println!("{}", "-".repeat(130));
            for (i, j) in jobs.iter().enumerate() {
                let marker = if j.synthetic { "*" } else { "" };
                println!(
                    "{:>3} | {:>5.2} | {:<40} | {:<24} | {:<30} | {:<12}",
                    i + 1,
                    j.score,
                    format!("{}{}", marker, cap_chars(&j.title, 37)),
                    cap_chars(&j.budget, 21),
                    cap_chars(&j.skills.join(", "), 27),
                    j.job_type
                );
            }
            println!(
                "\n{} job(s) | threshold {:.2} | * placeholder",
                jobs.len(),
                profile.score_threshold
            );
            Ok(())
        }
        Commands::Status => {
            let runs = store.recent_runs(5)?;
            if runs.is_empty() {
                println!("Never run.");
                return Ok(());
            }
            println!(
                "{:>5} | {:<11} | {:<9} | {:>5} | {:<20} | {:<20}",
                "Run", "Status", "Trigger", "Jobs", "Started", "Completed"
            );
            println!("{}", "-".repeat(85));
            let stamp = |t: Option<chrono::DateTime<chrono::Utc>>| {
                t.map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".into())
            };
            for r in &runs {
                println!(
                    "{:>5} | {:<11} | {:<9} | {:>5} | {:<20} | {:<20}",
                    r.id.unwrap_or_default(),
                    r.status,
                    r.trigger.as_str(),
                    r.jobs_found,
                    stamp(r.started_at),
                    stamp(r.completed_at)
                );
                if let Some(msg) = &r.error_message {
                    println!("      error: {}", cap_chars(msg, 120));
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let profile = current_profile(&store, &settings)?;
            let s = store.stats(profile.score_threshold)?;
            println!("Active jobs:     {}", s.total);
            println!("Above {:.2}:      {}", s.threshold, s.above_threshold);
            println!("Average score:   {:.3}", s.avg_score);
            println!("Scraped in 24h:  {}", s.recent_24h);
            match store.latest_run()? {
                Some(r) => println!("Last run:        {} ({} jobs)", r.status, r.jobs_found),
                None => println!("Last run:        never"),
            }
            Ok(())
        }
        Commands::Profile { action } => match action {
            ProfileAction::Show => {
                let p = current_profile(&store, &settings)?;
                println!("Skills:     {}", p.skills.join(", "));
                println!("Rate:       ${} - ${} / hr", p.rate_min, p.rate_max);
                println!("Threshold:  {:.2}", p.score_threshold);
                println!("Frequency:  {}", p.scrape_frequency);
                Ok(())
            }
            ProfileAction::Set {
                skills,
                rate_min,
                rate_max,
                threshold,
                frequency,
            } => {
                let mut p = current_profile(&store, &settings)?;
                if let Some(skills) = skills {
                    p.skills = skills
                        .into_iter()
                        .map(|s| s.trim().to_string())
                        .filter(|s| !s.is_empty())
                        .collect();
                }
                if let Some(v) = rate_min {
                    p.rate_min = v;
                }
                if let Some(v) = rate_max {
                    p.rate_max = v;
                }
                if let Some(v) = threshold {
                    p.score_threshold = v;
                }
                if let Some(v) = frequency {
                    p.scrape_frequency = v;
                }
                if !(0.0..=1.0).contains(&p.score_threshold) {
                    bail!("Threshold must be between 0 and 1, got {}", p.score_threshold);
                }
                if p.rate_min > p.rate_max {
                    bail!("rate_min ({}) is above rate_max ({})", p.rate_min, p.rate_max);
                }

                store.save_profile(&p)?;
                let updated = engine::recalculate_scores(&store, &p.skills, p.score_threshold)?;
                println!("Profile saved. Rescored {} job(s).", updated);
                Ok(())
            }
        },
    };

    let elapsed = t0.elapsed();
    if elapsed.as_secs() >= 1 {
        println!("\nDone in {}", format_duration(elapsed));
    }

    result
}

/// Flag raised on Ctrl-C; runs stop before their next URL.
fn cancel_on_ctrl_c() -> Arc<AtomicBool> {
    let flag = Arc::new(AtomicBool::new(false));
    let raised = Arc::clone(&flag);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Ctrl-C received, stopping after the current URL");
            raised.store(true, Ordering::SeqCst);
        }
    });
    flag
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
