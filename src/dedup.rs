use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use chrono::Utc;
use regex::Regex;
use tracing::{debug, warn};

use crate::db::Repository;
use crate::model::Job;

/// Prefix of ids minted for listings without a usable source URL.
pub const SYNTHETIC_PREFIX: &str = "job_";

/// Cipher at the end of an Upwork job path segment (`Some-Title_~01abc`).
static CIPHER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"~0[0-9a-zA-Z]+$").unwrap());
const UPWORK_HOST: &str = "upwork.com";

/// Mints synthetic ids: wall clock, then a per-process sequence, then a
/// random nonce so two processes started in the same millisecond differ.
pub struct IdGen {
    nonce: String,
    seq: AtomicU64,
}

impl IdGen {
    pub fn new() -> Self {
        let nonce = uuid::Uuid::new_v4().simple().to_string()[..8].to_string();
        IdGen {
            nonce,
            seq: AtomicU64::new(0),
        }
    }

    pub fn synthetic(&self) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        format!(
            "{}{}_{}_{}",
            SYNTHETIC_PREFIX,
            Utc::now().timestamp_millis(),
            seq,
            self.nonce
        )
    }
}

impl Default for IdGen {
    fn default() -> Self {
        Self::new()
    }
}

/// Stable identity for a listing URL.
///
/// Upwork job URLs carry a cipher (`~01abc…`) at the end of their last path
/// segment that survives slug and query changes, so it is preferred. Other
/// URLs are keyed on scheme, host and path with the query, fragment and
/// trailing slash dropped.
pub fn job_id(url: Option<&str>) -> Option<String> {
    let url = url?.trim();
    if url.is_empty() {
        return None;
    }
    if let Some(cipher) = upwork_cipher(url) {
        return Some(cipher);
    }
    let end = url.find(['?', '#']).unwrap_or(url.len());
    let key = url[..end].trim_end_matches('/');
    if key.is_empty() {
        None
    } else {
        Some(key.to_string())
    }
}

fn upwork_cipher(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let host = parsed.host_str()?;
    if host != UPWORK_HOST && !host.ends_with(".upwork.com") {
        return None;
    }
    let last = parsed.path_segments()?.filter(|s| !s.is_empty()).last()?;
    CIPHER_RE.find(last).map(|m| m.as_str().to_string())
}

/// Write a batch through the repository keyed by `Job.id`.
///
/// Duplicates within the batch collapse to the last occurrence (kept at the
/// position of the first). Each job replaces any stored record with the same
/// id. A failed write is logged and skipped. Returns the number written.
pub fn upsert<S: Repository>(batch: Vec<Job>, store: &S) -> usize {
    let mut order: Vec<String> = Vec::new();
    let mut latest: HashMap<String, Job> = HashMap::new();
    for job in batch {
        if latest.insert(job.id.clone(), job.clone()).is_some() {
            debug!("Duplicate id {} in batch, last one wins", job.id);
        } else {
            order.push(job.id);
        }
    }

    let mut written = 0;
    for id in order {
        let Some(job) = latest.remove(&id) else {
            continue;
        };
        match store.upsert_job(&job) {
            Ok(()) => written += 1,
            Err(e) => warn!("Failed to store {}, skipping: {}", job.id, e),
        }
    }
    written
}
