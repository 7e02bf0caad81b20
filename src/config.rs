use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::model::{Profile, ScrapeFrequency};

const DEFAULT_CONFIG_FILE: &str = "gig_scout";
const ENV_PREFIX: &str = "GIG";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererKind {
    Http,
    Spider,
    File,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub db_path: PathBuf,
    pub query_urls: Vec<String>,
    pub max_jobs: usize,
    pub auto_max_jobs: usize,
    pub renderer: RendererKind,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    pub default_skills: Vec<String>,
    pub default_rate_min: i32,
    pub default_rate_max: i32,
    pub default_score_threshold: f64,
    pub placeholders_on_empty: bool,
    pub retry_delay_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            db_path: PathBuf::from("data/gig_scout.sqlite"),
            query_urls: vec!["https://www.upwork.com/nx/search/jobs/?nbs=1&q=n8n".into()],
            max_jobs: 50,
            auto_max_jobs: 20,
            renderer: RendererKind::Http,
            user_agent: "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/124.0 Safari/537.36"
                .into(),
            request_timeout_secs: 30,
            default_skills: [
                "python",
                "n8n",
                "selenium",
                "api",
                "automation",
                "postgres",
                "docker",
                "github-actions",
                "react",
                "fastapi",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            default_rate_min: 25,
            default_rate_max: 90,
            default_score_threshold: 0.6,
            placeholders_on_empty: false,
            retry_delay_secs: 300,
        }
    }
}

impl Settings {
    /// Layered load: built-in defaults, then `gig_scout.toml` (or `path`), then
    /// `GIG_*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => File::from(p).required(true),
            None => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("query_urls")
                    .with_list_parse_key("default_skills"),
            )
            .build()
            .context("Failed to read configuration")?
            .try_deserialize::<Settings>()
            .context("Invalid configuration")?;
        Ok(settings)
    }

    /// Profile used when the store has no profile row yet.
    pub fn default_profile(&self) -> Profile {
        Profile {
            skills: self.default_skills.clone(),
            rate_min: self.default_rate_min,
            rate_max: self.default_rate_max,
            score_threshold: self.default_score_threshold,
            scrape_frequency: ScrapeFrequency::ThirtyMinutes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let s = Settings::default();
        assert_eq!(s.max_jobs, 50);
        assert_eq!(s.auto_max_jobs, 20);
        assert_eq!(s.default_skills.len(), 10);
        assert!(!s.placeholders_on_empty);
        let p = s.default_profile();
        assert_eq!(p.score_threshold, 0.6);
        assert_eq!((p.rate_min, p.rate_max), (25, 90));
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = std::env::temp_dir().join(format!("gig_scout_cfg_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("settings.toml");
        std::fs::write(&path, "max_jobs = 5\nrenderer = \"file\"\n").unwrap();

        let s = Settings::load(Some(&path)).unwrap();
        assert_eq!(s.max_jobs, 5);
        assert_eq!(s.renderer, RendererKind::File);
        assert_eq!(s.auto_max_jobs, 20);

        std::fs::remove_dir_all(&dir).ok();
    }
}
