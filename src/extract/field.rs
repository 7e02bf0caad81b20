use scraper::{ElementRef, Selector};
use tracing::trace;

use crate::model::Field;

/// How a rule turns strategy matches into one value.
#[derive(Debug, Clone, Copy)]
pub enum Mode {
    /// First element, in strategy order, whose text passes the predicate.
    First,
    /// Every passing element across all strategies, de-duplicated, joined.
    Collect { limit: usize, separator: &'static str },
}

/// Ordered selector strategies for one semantic field, most specific (current
/// markup) first, most generic (legacy markup) last.
#[derive(Debug, Clone, Copy)]
pub struct FieldRule {
    pub field: Field,
    pub strategies: &'static [&'static str],
    pub accept: fn(&str) -> bool,
    pub mode: Mode,
}

/// One matched element and its normalized text.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub strategy: &'static str,
    pub element: ElementRef<'a>,
    pub text: String,
}

/// Result of trying a single strategy against a container.
#[derive(Debug)]
pub enum Probe<'a> {
    Hit(Candidate<'a>),
    /// Selector matched nothing.
    Miss,
    /// Selector matched, but no element passed the field's predicate.
    Invalid { strategy: &'static str, seen: usize },
    /// Selector could not be compiled. Treated exactly like a miss.
    Broken { strategy: &'static str, reason: String },
}

// ── Rules ──

pub const TITLE: FieldRule = FieldRule {
    field: Field::Title,
    strategies: &[
        "a[data-test='job-tile-title-link UpLink']",
        ".job-tile-title a",
        "h2 a",
        "h3 a",
        "h4 a",
        "h5 a",
        "[data-test='JobTileTitle'] a",
        "[data-test='job-title'] a",
        "a[href*='/jobs/']",
        "a",
    ],
    accept: non_empty,
    mode: Mode::First,
};

pub const DESCRIPTION: FieldRule = FieldRule {
    field: Field::Description,
    strategies: &[
        "[data-test='UpCLineClamp JobDescription'] p",
        "[data-test='JobDescription']",
        "[data-test='job-description']",
        ".job-description",
        "p",
        "div p",
    ],
    accept: longer_than_ten,
    mode: Mode::Collect { limit: 3, separator: " " },
};

pub const BUDGET: FieldRule = FieldRule {
    field: Field::Budget,
    strategies: &[
        "li[data-test='job-type-label']",
        "li[data-test='is-fixed-price']",
        "[data-test='BudgetAmount']",
        "[data-test='budget']",
        ".budget",
        ".rate",
        "*[class*='budget']",
        "*[class*='rate']",
    ],
    accept: looks_like_budget,
    mode: Mode::Collect { limit: usize::MAX, separator: ", " },
};

pub const SKILLS: FieldRule = FieldRule {
    field: Field::Skills,
    strategies: &[
        "button[data-test='token']",
        "[data-test='SkillItem']",
        "[data-test='skill']",
        ".skill",
        ".tag",
        "*[class*='skill']",
        "*[class*='tag']",
    ],
    accept: looks_like_skill,
    mode: Mode::Collect { limit: 10, separator: ", " },
};

pub const JOB_TYPE: FieldRule = FieldRule {
    field: Field::JobType,
    strategies: &[
        "li[data-test='job-type-label']",
        "[data-test='JobType']",
        "[data-test='job-type']",
        "*[class*='type']",
    ],
    accept: looks_like_job_type,
    mode: Mode::First,
};

pub const DURATION: FieldRule = FieldRule {
    field: Field::Duration,
    strategies: &[
        "li[data-test='duration-label']",
        "[data-test='duration']",
        "*[class*='duration']",
    ],
    accept: non_empty,
    mode: Mode::First,
};

pub const EXPERIENCE_LEVEL: FieldRule = FieldRule {
    field: Field::ExperienceLevel,
    strategies: &[
        "li[data-test='experience-level']",
        "[data-test='contractor-tier']",
        "*[class*='experience']",
    ],
    accept: non_empty,
    mode: Mode::First,
};

pub const PROPOSALS: FieldRule = FieldRule {
    field: Field::Proposals,
    strategies: &[
        "li[data-test='proposals-tier']",
        "[data-test='proposals']",
        "*[class*='proposals']",
    ],
    accept: has_digit,
    mode: Mode::First,
};

pub const POSTED_TIME: FieldRule = FieldRule {
    field: Field::PostedTime,
    strategies: &[
        "small[data-test='job-pubilshed-date']",
        "[data-test='PostedTime']",
        "[data-test='posted']",
        "*[class*='posted']",
        "*[class*='time']",
        "time",
    ],
    accept: looks_recent,
    mode: Mode::First,
};

pub const CLIENT_SUMMARY: FieldRule = FieldRule {
    field: Field::ClientSummary,
    strategies: &[
        "[data-test='ClientSpendingAndHistory']",
        "[data-test='client']",
        "*[class*='client']",
        "*[class*='spending']",
    ],
    accept: non_empty,
    mode: Mode::Collect { limit: usize::MAX, separator: ", " },
};

pub const CLIENT_RATING: FieldRule = FieldRule {
    field: Field::ClientRating,
    strategies: &[
        "[data-test='feedback-rating']",
        "[data-test='client-rating']",
        "*[class*='rating']",
    ],
    accept: has_digit,
    mode: Mode::First,
};

pub const CLIENT_LOCATION: FieldRule = FieldRule {
    field: Field::ClientLocation,
    strategies: &[
        "li[data-test='location']",
        "[data-test='client-country']",
        "*[class*='location']",
    ],
    accept: non_empty,
    mode: Mode::First,
};

pub const CLIENT_SPENT: FieldRule = FieldRule {
    field: Field::ClientSpent,
    strategies: &[
        "li[data-test='total-spent']",
        "[data-test='client-spendings']",
        "*[class*='spent']",
    ],
    accept: has_dollar,
    mode: Mode::First,
};

pub const PAYMENT_VERIFIED: FieldRule = FieldRule {
    field: Field::PaymentVerified,
    strategies: &[
        "li[data-test='payment-verified']",
        "[data-test='payment-verification-status']",
        "*[class*='payment']",
    ],
    accept: mentions_verified,
    mode: Mode::First,
};

/// Everything resolved per container besides the title, which also carries
/// the listing URL and is handled separately.
pub const LISTING_RULES: &[FieldRule] = &[
    DESCRIPTION,
    BUDGET,
    SKILLS,
    JOB_TYPE,
    DURATION,
    EXPERIENCE_LEVEL,
    PROPOSALS,
    POSTED_TIME,
    CLIENT_SUMMARY,
    CLIENT_RATING,
    CLIENT_LOCATION,
    CLIENT_SPENT,
    PAYMENT_VERIFIED,
];

// ── Validity predicates ──

const RECENCY_KEYWORDS: &[&str] = &["ago", "hour", "day", "minute", "week", "yesterday", "just now"];

pub fn non_empty(text: &str) -> bool {
    !text.is_empty()
}

fn longer_than_ten(text: &str) -> bool {
    text.chars().count() > 10
}

pub fn looks_like_budget(text: &str) -> bool {
    text.contains('$') || text.to_lowercase().contains("hour")
}

fn looks_like_skill(text: &str) -> bool {
    !text.is_empty() && text.chars().count() < 50
}

fn looks_like_job_type(text: &str) -> bool {
    let lower = text.to_lowercase();
    lower.contains("hourly") || lower.contains("fixed")
}

pub fn looks_recent(text: &str) -> bool {
    let lower = text.to_lowercase();
    RECENCY_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

fn has_digit(text: &str) -> bool {
    text.chars().any(|c| c.is_ascii_digit())
}

fn has_dollar(text: &str) -> bool {
    text.contains('$')
}

fn mentions_verified(text: &str) -> bool {
    text.to_lowercase().contains("verified")
}

// ── Resolution ──

/// Resolve a field to its text, or `None` once every strategy is exhausted.
pub fn resolve(container: ElementRef<'_>, rule: &FieldRule) -> Option<String> {
    match rule.mode {
        Mode::First => resolve_candidate(container, rule).map(|c| c.text),
        Mode::Collect { limit, separator } => collect(container, rule, limit, separator),
    }
}

/// First-match resolution that keeps the matched element (the title needs
/// its `href`).
pub fn resolve_candidate<'a>(container: ElementRef<'a>, rule: &FieldRule) -> Option<Candidate<'a>> {
    for &strategy in rule.strategies {
        match probe(container, strategy, rule.accept) {
            Probe::Hit(candidate) => {
                trace!("{}: hit on {}", rule.field.name(), candidate.strategy);
                return Some(candidate);
            }
            Probe::Miss => trace!("{}: miss on {}", rule.field.name(), strategy),
            Probe::Invalid { strategy, seen } => {
                trace!("{}: {} matched {} but none valid", rule.field.name(), strategy, seen)
            }
            Probe::Broken { strategy, reason } => {
                trace!("{}: selector {} rejected: {}", rule.field.name(), strategy, reason)
            }
        }
    }
    None
}

/// Try one strategy: the first matching element whose text is accepted.
pub fn probe<'a>(container: ElementRef<'a>, strategy: &'static str, accept: fn(&str) -> bool) -> Probe<'a> {
    let selector = match Selector::parse(strategy) {
        Ok(s) => s,
        Err(e) => {
            return Probe::Broken {
                strategy,
                reason: format!("{:?}", e),
            }
        }
    };

    let mut seen = 0;
    for element in container.select(&selector) {
        seen += 1;
        let text = element_text(element);
        if accept(&text) {
            return Probe::Hit(Candidate {
                strategy,
                element,
                text,
            });
        }
    }

    if seen == 0 {
        Probe::Miss
    } else {
        Probe::Invalid { strategy, seen }
    }
}

fn collect(container: ElementRef<'_>, rule: &FieldRule, limit: usize, separator: &str) -> Option<String> {
    let mut parts: Vec<String> = Vec::new();
    let mut taken: Vec<ElementRef<'_>> = Vec::new();

    'strategies: for &strategy in rule.strategies {
        let Ok(selector) = Selector::parse(strategy) else {
            trace!("{}: selector {} rejected", rule.field.name(), strategy);
            continue;
        };
        for element in container.select(&selector) {
            // Wrappers of, or fragments inside, an element already taken count once.
            let is_taken = |n| ElementRef::wrap(n).is_some_and(|e| taken.contains(&e));
            if element.descendants().any(is_taken) || element.ancestors().any(is_taken) {
                continue;
            }
            let text = element_text(element);
            if (rule.accept)(&text) && !parts.contains(&text) {
                parts.push(text);
                taken.push(element);
                if parts.len() >= limit {
                    break 'strategies;
                }
            }
        }
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(separator))
    }
}

/// Element text with whitespace runs collapsed.
pub fn element_text(element: ElementRef<'_>) -> String {
    let raw: String = element.text().collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use scraper::Html;

    fn tile(html: &str) -> Html {
        Html::parse_fragment(html)
    }

    fn root(doc: &Html) -> ElementRef<'_> {
        doc.root_element()
    }

    #[test]
    fn current_markup_wins_over_legacy() {
        let doc = tile(
            r#"<div>
                 <h2><a href="/legacy">Legacy title</a></h2>
                 <a data-test="job-tile-title-link UpLink" href="/jobs/~01">Current title</a>
               </div>"#,
        );
        let c = resolve_candidate(root(&doc), &TITLE).unwrap();
        assert_eq!(c.text, "Current title");
        assert_eq!(c.strategy, "a[data-test='job-tile-title-link UpLink']");
        assert_eq!(c.element.value().attr("href"), Some("/jobs/~01"));
    }

    #[test]
    fn falls_through_to_legacy_markup() {
        let doc = tile(r#"<div><h3><a href="/x">Old layout title</a></h3></div>"#);
        assert_eq!(resolve(root(&doc), &TITLE).as_deref(), Some("Old layout title"));
    }

    #[test]
    fn invalid_match_moves_to_next_strategy() {
        // The first budget strategy matches a label without any rate in it.
        let doc = tile(
            r#"<ul>
                 <li data-test="job-type-label">Fixed price</li>
                 <span class="budget">$500</span>
               </ul>"#,
        );
        let container = root(&doc);
        assert!(matches!(
            probe(container, "li[data-test='job-type-label']", looks_like_budget),
            Probe::Invalid { seen: 1, .. }
        ));
        assert_eq!(resolve(container, &BUDGET).as_deref(), Some("$500"));
    }

    #[test]
    fn broken_selector_is_a_miss() {
        let doc = tile("<div><p>hello</p></div>");
        assert!(matches!(probe(root(&doc), "p[[", non_empty), Probe::Broken { .. }));

        let rule = FieldRule {
            field: Field::Description,
            strategies: &["p[[", "p"],
            accept: non_empty,
            mode: Mode::First,
        };
        assert_eq!(resolve(root(&doc), &rule).as_deref(), Some("hello"));
    }

    #[test]
    fn exhausted_strategies_are_absent() {
        let doc = tile("<div><span>nothing useful</span></div>");
        assert!(resolve(root(&doc), &POSTED_TIME).is_none());
        assert!(resolve(root(&doc), &BUDGET).is_none());
    }

    #[test]
    fn collect_dedups_and_caps() {
        let buttons: String = (0..14)
            .map(|i| format!(r#"<button data-test="token">skill{}</button>"#, i % 12))
            .collect();
        let doc = tile(&format!("<div>{}</div>", buttons));
        let skills = resolve(root(&doc), &SKILLS).unwrap();
        let parts: Vec<&str> = skills.split(", ").collect();
        assert_eq!(parts.len(), 10);
        assert_eq!(parts[0], "skill0");
    }

    #[test]
    fn posted_time_requires_recency_keyword() {
        let doc = tile(
            r#"<div>
                 <time>March</time>
                 <small data-test="job-pubilshed-date">Posted 5 hours ago</small>
               </div>"#,
        );
        assert_eq!(resolve(root(&doc), &POSTED_TIME).as_deref(), Some("Posted 5 hours ago"));
    }

    #[test]
    fn whitespace_is_collapsed() {
        let doc = tile("<div><p>  Build   an\n   n8n   flow  </p></div>");
        assert_eq!(resolve(root(&doc), &DESCRIPTION).as_deref(), Some("Build an n8n flow"));
    }
}
