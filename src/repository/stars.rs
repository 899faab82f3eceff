//! Best-effort star/fork counts scraped from a repository's public page
//!
//! Failures never propagate: any problem yields zero counts.

use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;
use std::time::Duration;

use crate::model::{RepoHandle, StarCounts};

/// Source of popularity counts for a repository
#[async_trait]
pub trait StarCounter: Send + Sync {
    async fn counts(&self, repo: &RepoHandle) -> StarCounts;
}

static STAR_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r#"id="repo-stars-counter-star"[^>]*title="([\d,]+)""#,
        r#"aria-label="([\d,]+) users? starred this repository""#,
        r#"([\d.,]+[kKmM]?)\s*</(?:strong|span)>\s*stars?\b"#,
    ])
});

static FORK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    compile(&[
        r#"id="repo-network-counter"[^>]*title="([\d,]+)""#,
        r#"aria-label="([\d,]+) users? forked this repository""#,
        r#"([\d.,]+[kKmM]?)\s*</(?:strong|span)>\s*forks?\b"#,
    ])
});

fn compile(patterns: &[&str]) -> Vec<Regex> {
    patterns.iter().filter_map(|p| Regex::new(p).ok()).collect()
}

/// Scrapes `<web_base>/<owner>/<repo>` for its star and fork counters.
pub struct HtmlStarScraper {
    http: reqwest::Client,
    web_base: String,
}

impl HtmlStarScraper {
    pub fn new(web_base: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .user_agent("skillsync")
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_default();
        Self {
            http,
            web_base: web_base.into().trim_end_matches('/').to_string(),
        }
    }

    async fn fetch_page(&self, repo: &RepoHandle) -> Result<String, reqwest::Error> {
        let url = format!("{}/{}/{}", self.web_base, repo.owner, repo.name);
        self.http
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await
    }
}

#[async_trait]
impl StarCounter for HtmlStarScraper {
    async fn counts(&self, repo: &RepoHandle) -> StarCounts {
        match self.fetch_page(repo).await {
            Ok(html) => parse_counts(&html),
            Err(e) => {
                tracing::debug!(%repo, error = %e, "star count page unavailable");
                StarCounts::default()
            }
        }
    }
}

/// Extract counts from a repository page; unknown values are zero.
pub fn parse_counts(html: &str) -> StarCounts {
    StarCounts {
        stars: first_match(&STAR_PATTERNS, html).unwrap_or(0),
        forks: first_match(&FORK_PATTERNS, html).unwrap_or(0),
    }
}

fn first_match(patterns: &[Regex], html: &str) -> Option<u64> {
    patterns
        .iter()
        .filter_map(|re| re.captures(html))
        .find_map(|caps| parse_abbreviated(caps.get(1)?.as_str()))
}

/// Parse `1,234`, `987`, `1.2k` or `3M` into a count
pub fn parse_abbreviated(text: &str) -> Option<u64> {
    let text = text.trim().replace(',', "");
    let (number, multiplier) = match text.chars().last()? {
        'k' | 'K' => (&text[..text.len() - 1], 1_000.0),
        'm' | 'M' => (&text[..text.len() - 1], 1_000_000.0),
        _ => (text.as_str(), 1.0),
    };
    let value: f64 = number.parse().ok()?;
    (value >= 0.0).then(|| (value * multiplier).round() as u64)
}
