use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};

use super::cap_chars;
use super::field::looks_like_budget;
use crate::model::{Field, ListingSource, RawListing};

/// A line containing any of these starts a new listing.
const INDICATORS: &[&str] = &["$", "hourly", "fixed", "budget", "posted"];
const TITLE_CAP: usize = 200;
const DESCRIPTION_CAP: usize = 1000;
/// Shorter continuation lines are navigation noise.
const MIN_CONTINUATION: usize = 20;
const INVISIBLE: &[&str] = &["script", "style", "noscript", "template", "head", "title"];

struct Segment {
    title: String,
    description: String,
    indicator: String,
    truncated: bool,
}

impl Segment {
    fn start(line: &str) -> Self {
        let title: String = line.chars().take(TITLE_CAP).collect();
        Segment {
            title,
            description: line.to_string(),
            indicator: line.to_string(),
            truncated: false,
        }
    }

    fn append(&mut self, line: &str) {
        if self.truncated {
            return;
        }
        self.description.push(' ');
        self.description.push_str(line);
        if self.description.chars().count() > DESCRIPTION_CAP {
            self.description = cap_chars(&self.description, DESCRIPTION_CAP);
            self.truncated = true;
        }
    }

    fn finish(self, position: usize, scraped_at: DateTime<Utc>) -> RawListing {
        let mut fields = BTreeMap::new();
        if looks_like_budget(&self.indicator) {
            fields.insert(Field::Budget, self.indicator.clone());
        }
        if mentions_age(&self.indicator) {
            fields.insert(Field::PostedTime, self.indicator.clone());
        }
        fields.insert(Field::Title, self.title);
        fields.insert(Field::Description, self.description);
        RawListing {
            fields,
            url: None,
            position,
            scraped_at,
            source: ListingSource::TextSegment,
        }
    }
}

/// Line-based fallback over the page's visible text.
pub fn segment(html: &Html, scraped_at: DateTime<Utc>) -> Vec<RawListing> {
    segment_lines(&visible_lines(html), scraped_at)
}

pub fn segment_lines(lines: &[String], scraped_at: DateTime<Utc>) -> Vec<RawListing> {
    let mut listings = Vec::new();
    let mut current: Option<Segment> = None;

    for line in lines.iter().map(|l| l.trim()).filter(|l| !l.is_empty()) {
        if is_indicator(line) {
            if let Some(seg) = current.take() {
                listings.push(seg.finish(listings.len() + 1, scraped_at));
            }
            current = Some(Segment::start(line));
        } else if let Some(seg) = current.as_mut() {
            if line.chars().count() > MIN_CONTINUATION {
                seg.append(line);
            }
        }
    }

    if let Some(seg) = current {
        listings.push(seg.finish(listings.len() + 1, scraped_at));
    }
    listings
}

/// Stricter than the container predicate: indicator lines often say "Hourly".
fn mentions_age(line: &str) -> bool {
    let lower = line.to_lowercase();
    lower.contains(" ago") || lower.contains("yesterday") || lower.contains("just now")
}

fn is_indicator(line: &str) -> bool {
    let lower = line.to_lowercase();
    INDICATORS.iter().any(|kw| lower.contains(kw))
}

/// Elements that start a new rendered line. Everything else is inline.
const BLOCKS: &[&str] = &[
    "address", "article", "aside", "blockquote", "br", "dd", "details", "div", "dl", "dt",
    "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3", "h4", "h5", "h6",
    "header", "hr", "li", "main", "nav", "ol", "p", "pre", "section", "summary", "table", "td",
    "th", "tr", "ul",
];

/// Visible text of `<body>` as rendered lines: inline markup joins into the
/// surrounding line, block elements and `<br>` break it.
pub fn visible_lines(html: &Html) -> Vec<String> {
    let body = Selector::parse("body")
        .ok()
        .and_then(|s| html.select(&s).next())
        .unwrap_or_else(|| html.root_element());

    let mut lines = Vec::new();
    let mut line = String::new();
    collect_lines(body, &mut line, &mut lines);
    flush(&mut line, &mut lines);
    lines
}

fn collect_lines(element: ElementRef, line: &mut String, lines: &mut Vec<String>) {
    for child in element.children() {
        if let Some(text) = child.value().as_text() {
            line.push_str(text);
        } else if let Some(el) = ElementRef::wrap(child) {
            let name = el.value().name();
            if INVISIBLE.contains(&name) {
                continue;
            }
            let block = BLOCKS.contains(&name);
            if block {
                flush(line, lines);
            }
            collect_lines(el, line, lines);
            if block {
                flush(line, lines);
            }
        }
    }
}

/// Collapse whitespace the way a browser renders it and emit a non-blank line.
fn flush(line: &mut String, lines: &mut Vec<String>) {
    let text = line.split_whitespace().collect::<Vec<_>>().join(" ");
    if !text.is_empty() {
        lines.push(text);
    }
    line.clear();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn indicator_lines_start_listings() {
        let out = segment_lines(
            &lines(&[
                "Find work",
                "Fixed-price - Posted 3 days ago",
                "Scrape product prices from three shops every night",
                "short",
                "Hourly: $30.00 - $60.00",
                "Maintain our n8n workflows and fix failing nodes",
            ]),
            Utc::now(),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].position, 1);
        assert_eq!(out[1].position, 2);
        assert_eq!(
            out[0].get(Field::Description),
            Some("Fixed-price - Posted 3 days ago Scrape product prices from three shops every night")
        );
        assert_eq!(out[0].get(Field::PostedTime), Some("Fixed-price - Posted 3 days ago"));
        assert!(out[0].get(Field::Budget).is_none());
        assert_eq!(out[1].get(Field::Budget), Some("Hourly: $30.00 - $60.00"));
        assert!(out[1].get(Field::PostedTime).is_none());
    }

    #[test]
    fn lines_before_first_indicator_are_ignored() {
        let out = segment_lines(&lines(&["A very long navigation line that says nothing"]), Utc::now());
        assert!(out.is_empty());
    }

    #[test]
    fn description_is_capped() {
        let long = "x".repeat(300);
        let mut raw = vec!["Budget: $100".to_string()];
        raw.extend(std::iter::repeat(long).take(10));
        let out = segment_lines(&raw, Utc::now());
        let desc = out[0].get(Field::Description).unwrap();
        assert_eq!(desc.chars().count(), DESCRIPTION_CAP + 3);
        assert!(desc.ends_with("..."));
    }

    #[test]
    fn title_is_capped() {
        let line = format!("$ {}", "y".repeat(400));
        let out = segment_lines(&[line], Utc::now());
        assert_eq!(out[0].get(Field::Title).unwrap().chars().count(), TITLE_CAP);
    }

    #[test]
    fn scripts_are_not_visible() {
        let html = Html::parse_document(
            "<html><head><title>$ title</title></head><body><script>var budget = '$1';</script><p>Hello there</p></body></html>",
        );
        assert_eq!(visible_lines(&html), vec!["Hello there".to_string()]);
    }

    #[test]
    fn inline_markup_stays_on_its_line() {
        let html = Html::parse_document(
            "<body><div><p>Budget: <strong>$500</strong> fixed price</p>\
             <p>Migrate our <em>Zapier</em> flows to n8n and document them</p>\
             Posted<br>2 hours ago</div></body>",
        );
        assert_eq!(
            visible_lines(&html),
            lines(&[
                "Budget: $500 fixed price",
                "Migrate our Zapier flows to n8n and document them",
                "Posted",
                "2 hours ago",
            ])
        );

        let out = segment(&html, Utc::now());
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].get(Field::Title), Some("Budget: $500 fixed price"));
        assert_eq!(out[0].get(Field::Budget), Some("Budget: $500 fixed price"));
        assert_eq!(out[1].get(Field::Title), Some("Posted"));
    }
}
