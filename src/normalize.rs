use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Duration, Utc};
use regex::Regex;

use crate::dedup::{self, IdGen};
use crate::model::{ClientInfo, Field, Job, RawListing};

/// Skills kept per job.
pub const MAX_SKILLS: usize = 10;
const NOT_AVAILABLE: &str = "N/A";

static RELATIVE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+|an?|one)\s+(second|minute|hour|day|week|month|year)s?\s+ago\b").unwrap()
});
static NUMBER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").unwrap());
static INTEGER_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").unwrap());
static SPENT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$[\d.,]+[KkMm]?\+?").unwrap());
static LABEL_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z .]{1,24}:\s*").unwrap());

/// Map a raw listing onto the canonical job schema.
///
/// Never fails: every missing or garbled field falls back to an empty value,
/// `"N/A"`, `false` or `0`. `now` stands in for a missing posted time.
pub fn normalize(raw: &RawListing, ids: &IdGen, now: DateTime<Utc>) -> Job {
    let text = |field| raw.get(field).map(str::trim).unwrap_or("");

    let budget = text(Field::Budget).to_string();
    let (posted_at, posted_label) = match raw.get(Field::PostedTime) {
        Some(label) => (resolve_posted(label, raw.scraped_at), Some(label.trim().to_string())),
        None => (now.to_rfc3339(), None),
    };

    let url = raw.url.clone().unwrap_or_default();
    let id = dedup::job_id(raw.url.as_deref()).unwrap_or_else(|| ids.synthetic());

    Job {
        id,
        title: text(Field::Title).to_string(),
        description: text(Field::Description).to_string(),
        url,
        job_type: job_type(text(Field::JobType), &budget),
        budget,
        duration: strip_label(text(Field::Duration)).to_string(),
        experience_level: strip_label(text(Field::ExperienceLevel)).to_lowercase(),
        skills: split_skills(text(Field::Skills)),
        client_info: client_info(raw),
        proposals: proposals(text(Field::Proposals)),
        posted_at,
        posted_label,
        score: 0.0,
        above_threshold: false,
        is_active: true,
        synthetic: false,
        scraped_at: raw.scraped_at,
        first_seen_at: None,
    }
}

/// Comma-joined skills to a list: trimmed, de-duplicated case-insensitively
/// (first spelling kept), capped at [`MAX_SKILLS`].
pub fn split_skills(raw: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case(NOT_AVAILABLE))
        .filter(|s| seen.insert(s.to_lowercase()))
        .take(MAX_SKILLS)
        .map(String::from)
        .collect()
}

fn job_type(label: &str, budget: &str) -> String {
    for source in [label, budget] {
        let lower = source.to_lowercase();
        if lower.contains("hour") || lower.contains("/hr") {
            return "Hourly".into();
        }
        if lower.contains("fixed") {
            return "Fixed-price".into();
        }
    }
    String::new()
}

/// "Less than 5" reads as zero; otherwise the first integer shown.
fn proposals(raw: &str) -> u32 {
    if raw.to_lowercase().contains("less than") {
        return 0;
    }
    INTEGER_RE
        .find(raw)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0)
}

fn client_info(raw: &RawListing) -> ClientInfo {
    let mut info = ClientInfo::default();

    if let Some(m) = raw.get(Field::ClientRating).and_then(|r| NUMBER_RE.find(r)) {
        info.rating = m.as_str().to_string();
    }
    if let Some(loc) = raw.get(Field::ClientLocation).map(strip_label).filter(|l| !l.is_empty()) {
        info.location = loc.to_string();
    }
    let spent = raw.get(Field::ClientSpent).or(raw.get(Field::ClientSummary));
    if let Some(m) = spent.and_then(|s| SPENT_RE.find(s)) {
        info.total_spent = m.as_str().to_string();
    }

    info.payment_verified = raw.get(Field::PaymentVerified).is_some_and(says_verified);
    info.verified = info.payment_verified || raw.get(Field::ClientSummary).is_some_and(says_verified);
    info
}

fn says_verified(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("verified") && !lower.contains("unverified")
}

/// Drop a short leading label such as "Est. time:" or "Location:".
fn strip_label(text: &str) -> &str {
    match LABEL_RE.find(text) {
        Some(m) if m.end() < text.len() => text[m.end()..].trim(),
        _ => text.trim(),
    }
}

/// Resolve a relative label ("Posted 5 hours ago") against the time the
/// listing was read. Labels that cannot be resolved are kept as shown.
pub fn resolve_posted(label: &str, scraped_at: DateTime<Utc>) -> String {
    let lower = label.to_lowercase();
    let offset = if lower.contains("just now") {
        Some(Duration::zero())
    } else if lower.contains("yesterday") {
        Some(Duration::days(1))
    } else if lower.contains("last week") {
        Some(Duration::weeks(1))
    } else {
        RELATIVE_RE.captures(&lower).and_then(|caps| {
            let amount: i64 = match &caps[1] {
                "a" | "an" | "one" => 1,
                n => n.parse().ok()?,
            };
            let unit = match &caps[2] {
                "second" => Duration::seconds(1),
                "minute" => Duration::minutes(1),
                "hour" => Duration::hours(1),
                "day" => Duration::days(1),
                "week" => Duration::weeks(1),
                "month" => Duration::days(30),
                _ => Duration::days(365),
            };
            unit.checked_mul(i32::try_from(amount).ok()?)
        })
    };

    match offset.and_then(|d| scraped_at.checked_sub_signed(d)) {
        Some(at) => at.to_rfc3339(),
        None => label.trim().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use chrono::TimeZone;

    use super::*;
    use crate::model::ListingSource;

    fn raw(fields: &[(Field, &str)], url: Option<&str>) -> RawListing {
        RawListing {
            fields: fields.iter().map(|(f, v)| (*f, v.to_string())).collect::<BTreeMap<_, _>>(),
            url: url.map(String::from),
            position: 1,
            scraped_at: Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap(),
            source: ListingSource::Container("article"),
        }
    }

    #[test]
    fn full_listing() {
        let r = raw(
            &[
                (Field::Title, "  Python Selenium Web Scraper "),
                (Field::Budget, "Hourly: $30.00 - $60.00"),
                (Field::Skills, "Python, Selenium, python, , N/A, API"),
                (Field::ExperienceLevel, "Experience level: Expert"),
                (Field::Duration, "Est. time: 1 to 3 months"),
                (Field::Proposals, "Proposals: 10 to 15"),
                (Field::PostedTime, "Posted 18 minutes ago"),
                (Field::ClientRating, "Rating is 4.9 out of 5."),
                (Field::ClientLocation, "United States"),
                (Field::ClientSpent, "$10K+ spent"),
                (Field::PaymentVerified, "Payment verified"),
            ],
            Some("https://www.upwork.com/jobs/x_~021900000000000001/"),
        );
        let job = normalize(&r, &IdGen::new(), Utc::now());

        assert_eq!(job.id, "~021900000000000001");
        assert_eq!(job.title, "Python Selenium Web Scraper");
        assert_eq!(job.job_type, "Hourly");
        assert_eq!(job.skills, vec!["Python", "Selenium", "API"]);
        assert_eq!(job.experience_level, "expert");
        assert_eq!(job.duration, "1 to 3 months");
        assert_eq!(job.proposals, 10);
        assert_eq!(job.posted_at, "2024-05-01T11:42:00+00:00");
        assert_eq!(job.posted_label.as_deref(), Some("Posted 18 minutes ago"));
        assert_eq!(job.client_info.rating, "4.9");
        assert_eq!(job.client_info.total_spent, "$10K+");
        assert!(job.client_info.payment_verified);
        assert!(job.client_info.verified);
        assert!(job.is_active);
        assert!(!job.synthetic);
    }

    #[test]
    fn empty_listing_gets_safe_defaults() {
        let now = Utc::now();
        let job = normalize(&raw(&[], None), &IdGen::new(), now);
        assert!(job.id.starts_with(dedup::SYNTHETIC_PREFIX));
        assert_eq!(job.title, "");
        assert!(job.skills.is_empty());
        assert_eq!(job.proposals, 0);
        assert_eq!(job.posted_at, now.to_rfc3339());
        assert!(job.posted_label.is_none());
        assert_eq!(job.client_info, ClientInfo::default());
        assert_eq!(job.job_type, "");
    }

    #[test]
    fn skills_capped_at_ten() {
        let many: Vec<String> = (0..15).map(|i| format!("s{}", i)).collect();
        assert_eq!(split_skills(&many.join(", ")).len(), MAX_SKILLS);
    }

    #[test]
    fn proposals_forms() {
        assert_eq!(proposals("Less than 5"), 0);
        assert_eq!(proposals("50+"), 50);
        assert_eq!(proposals("garbled"), 0);
    }

    #[test]
    fn unverified_is_not_verified() {
        let r = raw(&[(Field::PaymentVerified, "Payment unverified")], None);
        let job = normalize(&r, &IdGen::new(), Utc::now());
        assert!(!job.client_info.payment_verified);
        assert!(!job.client_info.verified);
    }

    #[test]
    fn fixed_price_from_budget() {
        assert_eq!(job_type("", "Fixed-price - Est. budget: $500"), "Fixed-price");
        assert_eq!(job_type("", "$25.00 - $45.00 / hour"), "Hourly");
    }

    #[test]
    fn posted_labels() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(resolve_posted("Posted yesterday", at), "2024-04-30T12:00:00+00:00");
        assert_eq!(resolve_posted("an hour ago", at), "2024-05-01T11:00:00+00:00");
        assert_eq!(resolve_posted("2 weeks ago", at), "2024-04-17T12:00:00+00:00");
        assert_eq!(resolve_posted("Just now", at), at.to_rfc3339());
        // Unparseable labels survive as text.
        assert_eq!(resolve_posted("Posted on Mar 3", at), "Posted on Mar 3");
    }

    #[test]
    fn out_of_range_ages_stay_verbatim() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(resolve_posted("Posted 999999 years ago", at), "Posted 999999 years ago");
        assert_eq!(resolve_posted("4294967297 minutes ago", at), "4294967297 minutes ago");
        assert_eq!(
            resolve_posted("99999999999999999999 days ago", at),
            "99999999999999999999 days ago"
        );

        let r = raw(&[(Field::Title, "Old"), (Field::PostedTime, "Posted 999999 years ago")], None);
        let job = normalize(&r, &IdGen::new(), at);
        assert_eq!(job.posted_at, "Posted 999999 years ago");
    }
}
