use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;

// ── Raw extraction output ──

/// Semantic fields the extractor knows how to locate inside a listing container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Field {
    Title,
    Description,
    Budget,
    Skills,
    JobType,
    Duration,
    ExperienceLevel,
    Proposals,
    PostedTime,
    ClientSummary,
    ClientRating,
    ClientLocation,
    ClientSpent,
    PaymentVerified,
    FullText,
}

impl Field {
    pub fn name(self) -> &'static str {
        match self {
            Field::Title => "title",
            Field::Description => "description",
            Field::Budget => "budget",
            Field::Skills => "skills",
            Field::JobType => "job_type",
            Field::Duration => "duration",
            Field::ExperienceLevel => "experience_level",
            Field::Proposals => "proposals",
            Field::PostedTime => "posted_time",
            Field::ClientSummary => "client_summary",
            Field::ClientRating => "client_rating",
            Field::ClientLocation => "client_location",
            Field::ClientSpent => "client_spent",
            Field::PaymentVerified => "payment_verified",
            Field::FullText => "full_text",
        }
    }
}

/// Where a raw listing came from: an adopted container strategy, or the
/// line-based fallback over the page's visible text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingSource {
    Container(&'static str),
    TextSegment,
}

/// One unvalidated listing. Fields that no strategy could resolve are simply
/// missing from `fields`.
#[derive(Debug, Clone)]
pub struct RawListing {
    pub fields: BTreeMap<Field, String>,
    pub url: Option<String>,
    pub position: usize,
    pub scraped_at: DateTime<Utc>,
    pub source: ListingSource,
}

impl RawListing {
    pub fn get(&self, field: Field) -> Option<&str> {
        self.fields.get(&field).map(String::as_str)
    }
}

// ── Canonical job ──

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientInfo {
    pub rating: String,
    pub location: String,
    pub verified: bool,
    pub total_spent: String,
    pub payment_verified: bool,
}

impl Default for ClientInfo {
    fn default() -> Self {
        ClientInfo {
            rating: "N/A".into(),
            location: "N/A".into(),
            verified: false,
            total_spent: "N/A".into(),
            payment_verified: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub budget: String,
    pub job_type: String,
    pub duration: String,
    pub experience_level: String,
    pub skills: Vec<String>,
    pub client_info: ClientInfo,
    pub proposals: u32,
    /// RFC 3339 when it could be resolved, otherwise the label as shown.
    pub posted_at: String,
    pub posted_label: Option<String>,
    pub score: f64,
    pub above_threshold: bool,
    pub is_active: bool,
    /// Placeholder record produced when a manual run found nothing.
    pub synthetic: bool,
    pub scraped_at: DateTime<Utc>,
    pub first_seen_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
impl Job {
    pub fn sample(id: &str, skills: &[&str], budget: &str) -> Job {
        Job {
            id: id.into(),
            title: format!("Job {}", id),
            description: String::new(),
            url: format!("https://www.upwork.com/jobs/{}/", id),
            budget: budget.into(),
            job_type: String::new(),
            duration: String::new(),
            experience_level: String::new(),
            skills: skills.iter().map(|s| s.to_string()).collect(),
            client_info: ClientInfo::default(),
            proposals: 0,
            posted_at: String::new(),
            posted_label: None,
            score: 0.0,
            above_threshold: false,
            is_active: true,
            synthetic: false,
            scraped_at: Utc::now(),
            first_seen_at: None,
        }
    }
}

// ── Profile ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrapeFrequency {
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "30min")]
    ThirtyMinutes,
    #[serde(rename = "1hour")]
    OneHour,
}

impl ScrapeFrequency {
    pub fn as_str(self) -> &'static str {
        match self {
            ScrapeFrequency::FiveMinutes => "5min",
            ScrapeFrequency::ThirtyMinutes => "30min",
            ScrapeFrequency::OneHour => "1hour",
        }
    }

    /// Unknown labels fall back to thirty minutes.
    pub fn from_label(label: &str) -> Self {
        label.parse().unwrap_or(ScrapeFrequency::ThirtyMinutes)
    }

    pub fn interval(self) -> Duration {
        let minutes = match self {
            ScrapeFrequency::FiveMinutes => 5,
            ScrapeFrequency::ThirtyMinutes => 30,
            ScrapeFrequency::OneHour => 60,
        };
        Duration::from_secs(minutes * 60)
    }
}

impl FromStr for ScrapeFrequency {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "5min" => Ok(ScrapeFrequency::FiveMinutes),
            "30min" => Ok(ScrapeFrequency::ThirtyMinutes),
            "1hour" => Ok(ScrapeFrequency::OneHour),
            other => Err(format!("unknown scrape frequency '{}' (5min, 30min, 1hour)", other)),
        }
    }
}

impl fmt::Display for ScrapeFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Scoring profile. Treated as an immutable snapshot for the duration of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub skills: Vec<String>,
    pub rate_min: i32,
    pub rate_max: i32,
    pub score_threshold: f64,
    pub scrape_frequency: ScrapeFrequency,
}

// ── Queries ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SortBy {
    Time,
    Score,
}

#[derive(Debug, Clone)]
pub struct JobFilter {
    pub above_threshold_only: bool,
    pub threshold: f64,
    pub sort: SortBy,
    pub limit: Option<usize>,
}

impl JobFilter {
    /// Every active job, newest first.
    pub fn all() -> Self {
        JobFilter {
            above_threshold_only: false,
            threshold: 0.0,
            sort: SortBy::Time,
            limit: None,
        }
    }
}

// ── Run outcome ──

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::InProgress => "in_progress",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Failed)
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "in_progress" => Ok(RunStatus::InProgress),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown run status '{}'", other)),
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTrigger {
    Manual,
    Automatic,
}

impl RunTrigger {
    pub fn as_str(self) -> &'static str {
        match self {
            RunTrigger::Manual => "manual",
            RunTrigger::Automatic => "automatic",
        }
    }

    pub fn from_label(label: &str) -> Self {
        if label == "automatic" {
            RunTrigger::Automatic
        } else {
            RunTrigger::Manual
        }
    }
}

/// Run log entry: `pending → in_progress → {completed | failed}`.
/// Terminal states reject further transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub id: Option<i64>,
    pub status: RunStatus,
    pub trigger: RunTrigger,
    pub jobs_found: usize,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl RunOutcome {
    pub fn pending(trigger: RunTrigger) -> Self {
        RunOutcome {
            id: None,
            status: RunStatus::Pending,
            trigger,
            jobs_found: 0,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }

    pub fn begin(&mut self, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(RunStatus::Pending, RunStatus::InProgress)?;
        self.started_at = Some(now);
        Ok(())
    }

    pub fn complete(&mut self, jobs_found: usize, now: DateTime<Utc>) -> Result<(), TransitionError> {
        self.transition(RunStatus::InProgress, RunStatus::Completed)?;
        self.jobs_found = jobs_found;
        self.completed_at = Some(now);
        Ok(())
    }

    /// A run that never got to `in_progress` may still fail directly.
    pub fn fail(
        &mut self,
        message: impl Into<String>,
        jobs_found: usize,
        now: DateTime<Utc>,
    ) -> Result<(), TransitionError> {
        if self.status.is_terminal() {
            return Err(TransitionError {
                from: self.status,
                to: RunStatus::Failed,
            });
        }
        if self.status == RunStatus::Pending {
            self.started_at = Some(now);
        }
        self.status = RunStatus::Failed;
        self.jobs_found = jobs_found;
        self.error_message = Some(message.into());
        self.completed_at = Some(now);
        Ok(())
    }

    fn transition(&mut self, from: RunStatus, to: RunStatus) -> Result<(), TransitionError> {
        if self.status != from {
            return Err(TransitionError { from: self.status, to });
        }
        self.status = to;
        Ok(())
    }
}
