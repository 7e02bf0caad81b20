use std::path::Path;

use chrono::{DateTime, Duration, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use crate::error::PersistenceError;
use crate::model::{Job, JobFilter, Profile, RunOutcome, RunStatus, RunTrigger, ScrapeFrequency, SortBy};

/// Keyed record store the engine writes through.
///
/// Single writer: callers serialize runs against one store.
pub trait Repository {
    fn get_profile(&self) -> Result<Option<Profile>, PersistenceError>;

    /// Insert, or replace every mutable field of the record with the same id.
    /// `first_seen_at` and `is_active` belong to the store and survive.
    fn upsert_job(&self, job: &Job) -> Result<(), PersistenceError>;

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, PersistenceError>;

    /// Insert a new run (`id == None`) and return its id, or commit the
    /// terminal transition of an `in_progress` run. Finished runs are frozen.
    fn record_run_outcome(&self, outcome: &RunOutcome) -> Result<i64, PersistenceError>;
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self, PersistenceError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| PersistenceError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        init_schema(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        let conn = Connection::open_in_memory()?;
        init_schema(&conn)?;
        Ok(SqliteStore { conn })
    }

    pub fn save_profile(&self, profile: &Profile) -> Result<(), PersistenceError> {
        self.conn.execute(
            "INSERT INTO profile (id, skills, rate_min, rate_max, score_threshold, scrape_frequency, updated_at)
             VALUES (1, ?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                skills = excluded.skills,
                rate_min = excluded.rate_min,
                rate_max = excluded.rate_max,
                score_threshold = excluded.score_threshold,
                scrape_frequency = excluded.scrape_frequency,
                updated_at = excluded.updated_at",
            params![
                serde_json::to_string(&profile.skills)?,
                profile.rate_min,
                profile.rate_max,
                profile.score_threshold,
                profile.scrape_frequency.as_str(),
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    pub fn latest_run(&self) -> Result<Option<RunOutcome>, PersistenceError> {
        Ok(self.recent_runs(1)?.into_iter().next())
    }

    /// Most recent runs first.
    pub fn recent_runs(&self, limit: usize) -> Result<Vec<RunOutcome>, PersistenceError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, status, triggered_by, jobs_found, error_message, started_at, completed_at
             FROM run_outcomes ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], run_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    pub fn stats(&self, threshold: f64) -> Result<Stats, PersistenceError> {
        let total: usize = self
            .conn
            .query_row("SELECT COUNT(*) FROM jobs WHERE is_active = 1", [], |r| r.get(0))?;
        let above_threshold: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE is_active = 1 AND score >= ?1",
            params![threshold],
            |r| r.get(0),
        )?;
        let avg_score: Option<f64> = self.conn.query_row(
            "SELECT AVG(score) FROM jobs WHERE is_active = 1",
            [],
            |r| r.get(0),
        )?;
        let recent_24h: usize = self.conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE is_active = 1 AND scraped_at >= ?1",
            params![Utc::now() - Duration::hours(24)],
            |r| r.get(0),
        )?;
        Ok(Stats {
            total,
            above_threshold,
            avg_score: avg_score.unwrap_or(0.0),
            recent_24h,
            threshold,
        })
    }
}

pub fn init_schema(conn: &Connection) -> Result<(), PersistenceError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS jobs (
            id               TEXT PRIMARY KEY,
            title            TEXT NOT NULL,
            description      TEXT NOT NULL DEFAULT '',
            url              TEXT NOT NULL DEFAULT '',
            budget           TEXT NOT NULL DEFAULT '',
            job_type         TEXT NOT NULL DEFAULT '',
            duration         TEXT NOT NULL DEFAULT '',
            experience_level TEXT NOT NULL DEFAULT '',
            skills           TEXT NOT NULL DEFAULT '[]',
            client_info      TEXT NOT NULL DEFAULT '{}',
            proposals        INTEGER NOT NULL DEFAULT 0,
            posted_at        TEXT NOT NULL,
            posted_label     TEXT,
            score            REAL NOT NULL DEFAULT 0,
            above_threshold  BOOLEAN NOT NULL DEFAULT 0,
            is_active        BOOLEAN NOT NULL DEFAULT 1,
            synthetic        BOOLEAN NOT NULL DEFAULT 0,
            scraped_at       TEXT NOT NULL,
            first_seen_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_jobs_score ON jobs(score);
        CREATE INDEX IF NOT EXISTS idx_jobs_scraped ON jobs(scraped_at);

        CREATE TABLE IF NOT EXISTS profile (
            id               INTEGER PRIMARY KEY CHECK(id = 1),
            skills           TEXT NOT NULL,
            rate_min         INTEGER NOT NULL,
            rate_max         INTEGER NOT NULL,
            score_threshold  REAL NOT NULL,
            scrape_frequency TEXT NOT NULL,
            updated_at       TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS run_outcomes (
            id            INTEGER PRIMARY KEY,
            status        TEXT NOT NULL CHECK(status IN ('pending','in_progress','completed','failed')),
            triggered_by  TEXT NOT NULL,
            jobs_found    INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            started_at    TEXT,
            completed_at  TEXT
        );
        ",
    )?;
    Ok(())
}

impl Repository for SqliteStore {
    fn get_profile(&self) -> Result<Option<Profile>, PersistenceError> {
        let row = self
            .conn
            .query_row(
                "SELECT skills, rate_min, rate_max, score_threshold, scrape_frequency FROM profile WHERE id = 1",
                [],
                |row| {
                    let frequency: String = row.get(4)?;
                    Ok(Profile {
                        skills: json_col(row, 0)?,
                        rate_min: row.get(1)?,
                        rate_max: row.get(2)?,
                        score_threshold: row.get(3)?,
                        scrape_frequency: ScrapeFrequency::from_label(&frequency),
                    })
                },
            )
            .optional()?;
        Ok(row)
    }

    fn upsert_job(&self, job: &Job) -> Result<(), PersistenceError> {
        self.conn.execute(
            "INSERT INTO jobs
             (id, title, description, url, budget, job_type, duration, experience_level,
              skills, client_info, proposals, posted_at, posted_label, score, above_threshold,
              is_active, synthetic, scraped_at, first_seen_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19)
             ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                description = excluded.description,
                url = excluded.url,
                budget = excluded.budget,
                job_type = excluded.job_type,
                duration = excluded.duration,
                experience_level = excluded.experience_level,
                skills = excluded.skills,
                client_info = excluded.client_info,
                proposals = excluded.proposals,
                posted_at = excluded.posted_at,
                posted_label = excluded.posted_label,
                score = excluded.score,
                above_threshold = excluded.above_threshold,
                synthetic = excluded.synthetic,
                scraped_at = excluded.scraped_at",
            params![
                job.id,
                job.title,
                job.description,
                job.url,
                job.budget,
                job.job_type,
                job.duration,
                job.experience_level,
                serde_json::to_string(&job.skills)?,
                serde_json::to_string(&job.client_info)?,
                job.proposals,
                job.posted_at,
                job.posted_label,
                job.score,
                job.above_threshold,
                job.is_active,
                job.synthetic,
                job.scraped_at,
                job.first_seen_at.unwrap_or(job.scraped_at),
            ],
        )?;
        Ok(())
    }

    fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, PersistenceError> {
        let mut conditions = vec!["is_active = 1".to_string()];
        let mut params: Vec<Box<dyn rusqlite::types::ToSql>> = Vec::new();

        if filter.above_threshold_only {
            conditions.push(format!("score >= ?{}", params.len() + 1));
            params.push(Box::new(filter.threshold));
        }

        let order = match filter.sort {
            SortBy::Time => "scraped_at DESC, id",
            SortBy::Score => "score DESC, scraped_at DESC, id",
        };
        let limit = match filter.limit {
            Some(n) => format!(" LIMIT {}", n),
            None => String::new(),
        };

        let sql = format!(
            "SELECT id, title, description, url, budget, job_type, duration, experience_level,
                    skills, client_info, proposals, posted_at, posted_label, score, above_threshold,
                    is_active, synthetic, scraped_at, first_seen_at
             FROM jobs WHERE {} ORDER BY {}{}",
            conditions.join(" AND "),
            order,
            limit
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::types::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let rows = stmt
            .query_map(param_refs.as_slice(), job_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn record_run_outcome(&self, outcome: &RunOutcome) -> Result<i64, PersistenceError> {
        match outcome.id {
            None => {
                self.conn.execute(
                    "INSERT INTO run_outcomes
                     (status, triggered_by, jobs_found, error_message, started_at, completed_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        outcome.status.as_str(),
                        outcome.trigger.as_str(),
                        outcome.jobs_found as i64,
                        outcome.error_message,
                        outcome.started_at,
                        outcome.completed_at,
                    ],
                )?;
                Ok(self.conn.last_insert_rowid())
            }
            Some(id) => {
                let changed = self.conn.execute(
                    "UPDATE run_outcomes
                     SET status = ?2, jobs_found = ?3, error_message = ?4, started_at = ?5, completed_at = ?6
                     WHERE id = ?1 AND status = 'in_progress'",
                    params![
                        id,
                        outcome.status.as_str(),
                        outcome.jobs_found as i64,
                        outcome.error_message,
                        outcome.started_at,
                        outcome.completed_at,
                    ],
                )?;
                if changed == 0 {
                    return Err(PersistenceError::Frozen(id));
                }
                Ok(id)
            }
        }
    }
}

// ── Row mapping ──

fn json_col<T: DeserializeOwned>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T> {
    let raw: String = row.get(idx)?;
    serde_json::from_str(&raw).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<Job> {
    Ok(Job {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        url: row.get(3)?,
        budget: row.get(4)?,
        job_type: row.get(5)?,
        duration: row.get(6)?,
        experience_level: row.get(7)?,
        skills: json_col(row, 8)?,
        client_info: json_col(row, 9)?,
        proposals: row.get(10)?,
        posted_at: row.get(11)?,
        posted_label: row.get(12)?,
        score: row.get(13)?,
        above_threshold: row.get(14)?,
        is_active: row.get(15)?,
        synthetic: row.get(16)?,
        scraped_at: row.get(17)?,
        first_seen_at: row.get(18)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunOutcome> {
    let status: String = row.get(1)?;
    let trigger: String = row.get(2)?;
    let jobs_found: i64 = row.get(3)?;
    Ok(RunOutcome {
        id: Some(row.get(0)?),
        status: status
            .parse::<RunStatus>()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, e.into()))?,
        trigger: RunTrigger::from_label(&trigger),
        jobs_found: jobs_found.max(0) as usize,
        error_message: row.get(4)?,
        started_at: row.get::<_, Option<DateTime<Utc>>>(5)?,
        completed_at: row.get::<_, Option<DateTime<Utc>>>(6)?,
    })
}

// ── Stats ──

pub struct Stats {
    pub total: usize,
    pub above_threshold: usize,
    pub avg_score: f64,
    pub recent_24h: usize,
    pub threshold: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    #[test]
    fn upsert_twice_keeps_one_record_second_wins() {
        let db = store();
        let mut job = Job::sample("~01a", &["python"], "$30");
        db.upsert_job(&job).unwrap();
        let first_seen = db.list_jobs(&JobFilter::all()).unwrap()[0].first_seen_at;

        job.title = "Renamed".into();
        job.score = 0.7;
        job.scraped_at = job.scraped_at + Duration::minutes(5);
        db.upsert_job(&job).unwrap();

        let jobs = db.list_jobs(&JobFilter::all()).unwrap();
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].title, "Renamed");
        assert_eq!(jobs[0].score, 0.7);
        assert_eq!(jobs[0].first_seen_at, first_seen);
        assert_eq!(jobs[0].skills, vec!["python"]);
    }

    #[test]
    fn list_filters_and_sorts() {
        let db = store();
        let now = Utc::now();
        for (i, score) in [0.2, 0.9, 0.6].iter().enumerate() {
            let mut job = Job::sample(&format!("~0{}", i), &[], "");
            job.score = *score;
            job.scraped_at = now - Duration::minutes(i as i64);
            db.upsert_job(&job).unwrap();
        }

        let by_time = db.list_jobs(&JobFilter::all()).unwrap();
        let ids: Vec<&str> = by_time.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["~00", "~01", "~02"]);

        let filter = JobFilter {
            above_threshold_only: true,
            threshold: 0.6,
            sort: SortBy::Score,
            limit: Some(5),
        };
        let top = db.list_jobs(&filter).unwrap();
        let ids: Vec<&str> = top.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["~01", "~02"]);

        let one = JobFilter {
            limit: Some(1),
            ..JobFilter::all()
        };
        assert_eq!(db.list_jobs(&one).unwrap().len(), 1);
    }

    #[test]
    fn profile_roundtrip() {
        let db = store();
        assert!(db.get_profile().unwrap().is_none());
        let profile = Profile {
            skills: vec!["python".into(), "python".into(), "n8n".into()],
            rate_min: 30,
            rate_max: 80,
            score_threshold: 0.5,
            scrape_frequency: ScrapeFrequency::FiveMinutes,
        };
        db.save_profile(&profile).unwrap();
        db.save_profile(&profile).unwrap();
        assert_eq!(db.get_profile().unwrap(), Some(profile));
    }

    #[test]
    fn finished_runs_are_frozen() {
        let db = store();
        let now = Utc::now();
        let mut run = RunOutcome::pending(RunTrigger::Manual);
        run.begin(now).unwrap();
        run.id = Some(db.record_run_outcome(&run).unwrap());
        assert_eq!(db.latest_run().unwrap().unwrap().status, RunStatus::InProgress);

        run.complete(4, now).unwrap();
        db.record_run_outcome(&run).unwrap();
        let stored = db.latest_run().unwrap().unwrap();
        assert_eq!(stored.status, RunStatus::Completed);
        assert_eq!(stored.jobs_found, 4);

        let err = db.record_run_outcome(&run).unwrap_err();
        assert!(matches!(err, PersistenceError::Frozen(_)));
    }

    #[test]
    fn stats_count_active_jobs() {
        let db = store();
        for (id, score) in [("~0a", 0.8), ("~0b", 0.4)] {
            let mut job = Job::sample(id, &[], "");
            job.score = score;
            db.upsert_job(&job).unwrap();
        }
        let s = db.stats(0.6).unwrap();
        assert_eq!(s.total, 2);
        assert_eq!(s.above_threshold, 1);
        assert_eq!(s.recent_24h, 2);
        assert!((s.avg_score - 0.6).abs() < 1e-9);
    }

    #[test]
    fn open_creates_parent_dir() {
        let dir = std::env::temp_dir().join(format!("gig_scout_db_{}", std::process::id()));
        let path = dir.join("nested").join("jobs.sqlite");
        let db = SqliteStore::open(&path).unwrap();
        db.upsert_job(&Job::sample("~0z", &[], "")).unwrap();
        assert!(path.exists());
        drop(db);
        std::fs::remove_dir_all(&dir).ok();
    }
}
