pub mod field;
pub mod text;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use tracing::{debug, info, warn};

use crate::error::ExtractError;
use crate::model::{Field, ListingSource, RawListing};
use crate::render::Document;

/// Listing container strategies, current markup first.
pub const CONTAINER_STRATEGIES: &[&str] = &[
    "article[data-test='JobTile']",
    "article[data-test='job-tile']",
    "[data-test='JobTile']",
    "section[data-test='job-tile']",
    "div[data-cy='job-tile']",
    ".job-tile",
    "article",
    "section",
];

/// A container strategy is only adopted with strictly more matches than this.
pub const MIN_CONTAINERS: usize = 2;

const FULL_TEXT_CAP: usize = 500;

/// Which container strategy the document was read with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerPick {
    Adopted(&'static str),
    /// No strategy cleared the threshold; the text fallback ran instead.
    Exhausted,
}

impl fmt::Display for ContainerPick {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContainerPick::Adopted(s) => f.write_str(s),
            ContainerPick::Exhausted => f.write_str("text-segmentation"),
        }
    }
}

pub struct Extraction {
    pub pick: ContainerPick,
    pub listings: Vec<RawListing>,
}

/// Extract every listing in a rendered document.
///
/// The first container strategy with more than [`MIN_CONTAINERS`] matches is
/// used for the whole document. When none qualifies the page's visible text
/// is segmented instead, so structural drift degrades fidelity rather than
/// yielding nothing.
pub fn extract(document: &Document) -> Extraction {
    let html = Html::parse_document(&document.html);
    let scraped_at = Utc::now();

    let Some((strategy, containers)) = pick_containers(&html) else {
        info!("No container strategy matched on {}, segmenting page text", document.url);
        return Extraction {
            pick: ContainerPick::Exhausted,
            listings: text::segment(&html, scraped_at),
        };
    };

    info!("Adopted {} on {} ({} containers)", strategy, document.url, containers.len());

    let listings = containers
        .into_iter()
        .enumerate()
        .filter_map(|(i, container)| {
            match build_listing(container, i + 1, strategy, &document.url, scraped_at) {
                Ok(listing) => Some(listing),
                Err(e) => {
                    warn!("Skipping container on {}: {}", document.url, e);
                    None
                }
            }
        })
        .collect();

    Extraction {
        pick: ContainerPick::Adopted(strategy),
        listings,
    }
}

fn pick_containers(html: &Html) -> Option<(&'static str, Vec<ElementRef<'_>>)> {
    for &strategy in CONTAINER_STRATEGIES {
        let selector = match Selector::parse(strategy) {
            Ok(s) => s,
            Err(e) => {
                debug!("Container selector {} rejected: {:?}", strategy, e);
                continue;
            }
        };
        let found: Vec<ElementRef> = html.select(&selector).collect();
        if found.len() > MIN_CONTAINERS {
            return Some((strategy, found));
        }
        debug!("{} matched only {} container(s)", strategy, found.len());
    }
    None
}

fn build_listing(
    container: ElementRef<'_>,
    position: usize,
    strategy: &'static str,
    base_url: &str,
    scraped_at: DateTime<Utc>,
) -> Result<RawListing, ExtractError> {
    let title = field::resolve_candidate(container, &field::TITLE).ok_or(ExtractError::Untitled(position))?;
    let url = title
        .element
        .value()
        .attr("href")
        .and_then(|href| absolutize(base_url, href));

    let mut fields = BTreeMap::new();
    fields.insert(Field::Title, title.text);
    for rule in field::LISTING_RULES {
        if let Some(value) = field::resolve(container, rule) {
            fields.insert(rule.field, value);
        }
    }

    let full_text = field::element_text(container);
    if !full_text.is_empty() {
        fields.insert(Field::FullText, cap_chars(&full_text, FULL_TEXT_CAP));
    }

    Ok(RawListing {
        fields,
        url,
        position,
        scraped_at,
        source: ListingSource::Container(strategy),
    })
}

/// Resolve a listing href against the document URL.
pub fn absolutize(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
        return None;
    }
    if let Ok(url) = reqwest::Url::parse(href) {
        return Some(url.to_string());
    }
    reqwest::Url::parse(base)
        .ok()?
        .join(href)
        .ok()
        .map(|u| u.to_string())
}

/// Truncate to `max` characters, marking the cut with "...".
pub fn cap_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{}...", truncated)
    }
}

// ── Tests ──
