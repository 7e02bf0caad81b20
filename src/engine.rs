use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use tracing::{debug, error, info, warn};

use crate::config::Settings;
use crate::db::Repository;
use crate::dedup::{self, IdGen};
use crate::error::{PersistenceError, RenderError};
use crate::extract;
use crate::model::{ClientInfo, Job, JobFilter, Profile, RunOutcome, RunTrigger};
use crate::normalize::normalize;
use crate::render::{short_url, Renderer};
use crate::score;

/// Placeholders minted per empty manual run, at most.
const MAX_PLACEHOLDERS: usize = 3;

#[derive(Debug, Clone, Copy, Default)]
pub struct EngineOptions {
    /// Mint clearly tagged placeholder jobs when a manual run finds nothing.
    pub placeholders_on_empty: bool,
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        EngineOptions {
            placeholders_on_empty: settings.placeholders_on_empty,
        }
    }
}

/// Sequences extraction passes. Holds no state between runs besides the id
/// generator and the cancel flag, which the caller owns.
pub struct Engine<R> {
    renderer: R,
    options: EngineOptions,
    ids: IdGen,
    cancel: Arc<AtomicBool>,
}

impl<R: Renderer> Engine<R> {
    pub fn new(renderer: R, options: EngineOptions, cancel: Arc<AtomicBool>) -> Self {
        Engine {
            renderer,
            options,
            ids: IdGen::new(),
            cancel,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// One pass over `query_urls`: render, extract, normalize, score, upsert.
    ///
    /// A URL that fails is logged and skipped; the run only fails when every
    /// attempted URL failed, or when the run log cannot be opened. At most
    /// `max_jobs` listings are taken across all URLs. The returned outcome is
    /// always terminal.
    pub async fn run_once<S: Repository>(
        &self,
        store: &S,
        query_urls: &[String],
        profile: &Profile,
        max_jobs: usize,
        trigger: RunTrigger,
    ) -> RunOutcome {
        let mut outcome = RunOutcome::pending(trigger);
        if let Err(e) = outcome.begin(Utc::now()) {
            error!("Run could not start: {}", e);
            return outcome;
        }
        match store.record_run_outcome(&outcome) {
            Ok(id) => outcome.id = Some(id),
            Err(e) => {
                error!("Cannot open run log: {}", e);
                if let Err(e) = outcome.fail(format!("cannot open run log: {}", e), 0, Utc::now()) {
                    error!("Run outcome rejected failure: {}", e);
                }
                return outcome;
            }
        }
        info!(
            "Run #{} started ({}, {} URL(s), up to {} jobs)",
            outcome.id.unwrap_or_default(),
            trigger.as_str(),
            query_urls.len(),
            max_jobs
        );

        let pb = ProgressBar::new(query_urls.len() as u64);
        if let Ok(style) = ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len} {msg}") {
            pb.set_style(style.progress_chars("=> "));
        }

        let mut found = 0usize;
        let mut succeeded = 0usize;
        let mut failures: Vec<String> = Vec::new();

        for url in query_urls {
            if self.is_cancelled() {
                warn!("Run cancelled before {}, skipping remaining URLs", url);
                break;
            }
            let budget = max_jobs.saturating_sub(found);
            if budget == 0 {
                info!("Job budget of {} reached, skipping remaining URLs", max_jobs);
                break;
            }
            pb.set_message(short_url(url));

            match self.process_url(store, url, profile, budget).await {
                Ok(n) => {
                    succeeded += 1;
                    found += n;
                }
                Err(e) => {
                    warn!("Query URL {} failed: {}", url, e);
                    failures.push(format!("{}: {}", url, e));
                }
            }
            pb.inc(1);
        }
        pb.finish_and_clear();

        if found == 0 && trigger == RunTrigger::Manual && self.options.placeholders_on_empty {
            let minted = self.insert_placeholders(store, profile, max_jobs.min(MAX_PLACEHOLDERS));
            info!("No listings found, inserted {} placeholder job(s)", minted);
        }

        let now = Utc::now();
        let attempted = succeeded + failures.len();
        let transition = if attempted > 0 && succeeded == 0 {
            outcome.fail(failures.join("; "), found, now)
        } else {
            outcome.complete(found, now)
        };
        if let Err(e) = transition {
            error!("Run outcome rejected transition: {}", e);
        }
        if let Err(e) = store.record_run_outcome(&outcome) {
            error!("Failed to record outcome of run #{}: {}", outcome.id.unwrap_or_default(), e);
        }

        info!(
            "Run #{} {}: {} job(s), {} failed URL(s)",
            outcome.id.unwrap_or_default(),
            outcome.status,
            found,
            failures.len()
        );
        outcome
    }

    async fn process_url<S: Repository>(
        &self,
        store: &S,
        url: &str,
        profile: &Profile,
        budget: usize,
    ) -> Result<usize, RenderError> {
        let document = self.renderer.load(url).await?;
        let extraction = extract::extract(&document);

        let now = Utc::now();
        let jobs: Vec<Job> = extraction
            .listings
            .iter()
            .take(budget)
            .map(|raw| {
                let mut job = normalize(raw, &self.ids, now);
                score::apply(&mut job, &profile.skills, profile.score_threshold);
                debug!("Listing {} ({:?}) -> {} scored {:.2}", raw.position, raw.source, job.id, job.score);
                job
            })
            .collect();

        let found = jobs.len();
        let written = dedup::upsert(jobs, store);
        info!(
            "Processed {} via {}: {} job(s), {} written",
            short_url(url),
            extraction.pick,
            found,
            written
        );
        Ok(found)
    }

    fn insert_placeholders<S: Repository>(&self, store: &S, profile: &Profile, count: usize) -> usize {
        let now = Utc::now();
        let jobs: Vec<Job> = (1..=count)
            .map(|n| {
                let mut job = Job {
                    id: self.ids.synthetic(),
                    title: format!("[placeholder {}] No listings found in the last run", n),
                    description: "Generated because a manual run found no listings. Not a real job.".into(),
                    url: String::new(),
                    budget: String::new(),
                    job_type: String::new(),
                    duration: String::new(),
                    experience_level: String::new(),
                    skills: profile.skills.iter().take(3).cloned().collect(),
                    client_info: ClientInfo::default(),
                    proposals: 0,
                    posted_at: now.to_rfc3339(),
                    posted_label: None,
                    score: 0.0,
                    above_threshold: false,
                    is_active: true,
                    synthetic: true,
                    scraped_at: now,
                    first_seen_at: None,
                };
                score::apply(&mut job, &profile.skills, profile.score_threshold);
                job
            })
            .collect();
        dedup::upsert(jobs, store)
    }
}

/// Rescore every stored job against `profile_skills` and refresh the
/// threshold flag. Returns how many records were rewritten; a job that fails
/// to write is logged and skipped.
pub fn recalculate_scores<S: Repository>(
    store: &S,
    profile_skills: &[String],
    threshold: f64,
) -> Result<usize, PersistenceError> {
    let jobs = store.list_jobs(&JobFilter::all())?;

    let rescored: Vec<Job> = jobs
        .into_par_iter()
        .map(|mut job| {
            score::apply(&mut job, profile_skills, threshold);
            job
        })
        .collect();

    let pb = ProgressBar::new(rescored.len() as u64);
    let mut updated = 0;
    for job in &rescored {
        match store.upsert_job(job) {
            Ok(()) => updated += 1,
            Err(e) => warn!("Failed to rescore {}, skipping: {}", job.id, e),
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    info!("Recalculated {} score(s) at threshold {:.2}", updated, threshold);
    Ok(updated)
}

/// The stored profile, or the configured default when none was saved yet.
pub fn current_profile<S: Repository>(store: &S, settings: &Settings) -> Result<Profile, PersistenceError> {
    Ok(store.get_profile()?.unwrap_or_else(|| settings.default_profile()))
}

// ── Tests ──
