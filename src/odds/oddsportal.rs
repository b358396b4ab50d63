use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use scraper::{ElementRef, Html, Selector};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

use super::markets::outcome_labels;
use super::source::OddsSource;
use crate::models::{BookmakerOdds, MatchRecord, PeriodScore};

/// Live-odds index enumerating in-play matches across all sports.
pub const DEFAULT_LISTING_URL: &str = "https://www.oddsportal.com/inplay-odds/";

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Substrings that identify a bookmaker name when the page offers no logo title.
const BOOKMAKER_HINTS: &[&str] = &[
    "bet365", "betmgm", "fanduel", "draftkings", "caesars", "pointsbet", "betrivers", "unibet",
    "william hill", "williamhill", "ladbrokes", "betfair", "pinnacle", "bovada", "betonline",
    "mybookie", "betway", "888", "bwin", "betfred", "paddy power", "paddypower", "sportsbet",
    "neds", "betsson", "10bet", "1xbet", "melbet", "22bet", "stake", "cloudbet", ".com", ".us",
    ".uk", ".eu", "bet", "book", "wager",
];

/// Names too short to search for as substrings; matched as whole words.
const BOOKMAKER_WORDS: &[&str] = &["tab"];

/// How quotes are filtered and labelled while scraping a match page.
#[derive(Debug, Clone)]
pub struct ScrapeOptions {
    /// Only keep rows for this bookmaker (case-insensitive)
    pub target_bookmaker: Option<String>,
    /// Period label stamped on every quote, e.g. "FullTime"
    pub period: String,
}

impl Default for ScrapeOptions {
    fn default() -> Self {
        ScrapeOptions {
            target_bookmaker: None,
            period: "FullTime".to_string(),
        }
    }
}

/// Odds source backed by plain HTTP fetches of the OddsPortal live pages.
pub struct OddsPortal {
    /// One client per proxy (or a single direct client), used round-robin
    clients: Vec<Client>,
    next_client: AtomicUsize,
    listing_url: Url,
    options: ScrapeOptions,
}

impl OddsPortal {
    pub fn new(
        listing_url: &str,
        user_agent: &str,
        request_timeout: Duration,
        proxies: &[String],
        options: ScrapeOptions,
    ) -> Result<Self> {
        let build = |proxy: Option<&str>| -> Result<Client> {
            let mut builder = Client::builder().user_agent(user_agent).timeout(request_timeout);
            if let Some(proxy) = proxy {
                let proxy = reqwest::Proxy::all(proxy)
                    .with_context(|| format!("Invalid proxy '{}'", proxy))?;
                builder = builder.proxy(proxy);
            }
            builder.build().context("Failed to build HTTP client")
        };
        let clients = if proxies.is_empty() {
            vec![build(None)?]
        } else {
            proxies
                .iter()
                .map(|p| build(Some(p)))
                .collect::<Result<Vec<_>>>()?
        };
        let listing_url = Url::parse(listing_url)
            .with_context(|| format!("Invalid listing URL '{}'", listing_url))?;
        Ok(OddsPortal {
            clients,
            next_client: AtomicUsize::new(0),
            listing_url,
            options,
        })
    }

    fn client(&self) -> &Client {
        let i = self.next_client.fetch_add(1, Ordering::Relaxed);
        &self.clients[i % self.clients.len()]
    }

    async fn get_html(&self, url: &str) -> Result<String> {
        debug!("GET {}", url);
        let resp = self
            .client()
            .get(url)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if !resp.status().is_success() {
            anyhow::bail!("{} returned {}", url, resp.status());
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;
        if body.trim().is_empty() {
            anyhow::bail!("{} returned an empty page", url);
        }
        Ok(body)
    }
}

#[async_trait]
impl OddsSource for OddsPortal {
    fn name(&self) -> &str {
        "OddsPortal"
    }

    async fn fetch_listing(&self) -> Result<Vec<String>> {
        let html = self.get_html(self.listing_url.as_str()).await?;
        parse_listing(&html, &self.listing_url)
    }

    async fn extract_match(&self, link: &str, markets: &[String]) -> Result<MatchRecord> {
        let html = self.get_html(link).await?;
        parse_match_page(&html, link, markets, &self.options)
    }
}

// ── Parsing helpers ────────────────────────────────────────────────────────────

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow!("Invalid selector '{}': {:?}", css, e))
}

fn text_of(el: ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Collect match links from the listing page: absolute http(s) URLs with at
/// least three path segments (`/sport/country/league/match/`), without query
/// or fragment, de-duplicated in page order.
fn parse_listing(html: &str, base: &Url) -> Result<Vec<String>> {
    let document = Html::parse_document(html);
    let anchors = selector("a[href]")?;

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for a in document.select(&anchors) {
        let Some(href) = a.value().attr("href") else {
            continue;
        };
        let Ok(mut url) = base.join(href) else {
            continue;
        };
        if !matches!(url.scheme(), "http" | "https") {
            continue;
        }
        url.set_query(None);
        url.set_fragment(None);
        let segments = url
            .path_segments()
            .map(|s| s.filter(|seg| !seg.is_empty()).count())
            .unwrap_or(0);
        if segments < 3 {
            continue;
        }
        let link = url.to_string();
        if seen.insert(link.clone()) {
            links.push(link);
        }
    }

    debug!("Listing page yielded {} match links", links.len());
    Ok(links)
}

fn parse_match_page(
    html: &str,
    link: &str,
    markets: &[String],
    options: &ScrapeOptions,
) -> Result<MatchRecord> {
    let document = Html::parse_document(html);
    let root = document.root_element();

    let (home_team, away_team) = parse_teams(root)?;
    let mut record = MatchRecord::new(link);
    record.home_team = home_team;
    record.away_team = away_team;

    let crumbs = selector(r#"[data-testid="breadcrumbs-line"] a, .breadcrumbs a"#)?;
    record.league = root
        .select(&crumbs)
        .last()
        .map(text_of)
        .unwrap_or_default();

    let score_sel = selector(r#"[data-testid="game-score"], .result .score"#)?;
    if let Some((home, away)) = root
        .select(&score_sel)
        .next()
        .and_then(|el| parse_score_pair(&text_of(el)))
    {
        record.home_score = Some(home);
        record.away_score = Some(away);
    }

    let partial_sel = selector(r#"[data-testid="game-partial-results"], .partial-results"#)?;
    if let Some(el) = root.select(&partial_sel).next() {
        record.partial_results = parse_partial_results(&text_of(el));
    }

    for market in markets {
        let labels = outcome_labels(market)
            .ok_or_else(|| anyhow!("Unsupported market '{}'", market))?;
        let section_sel = selector(&format!(r#"[data-market="{}"]"#, market))?;
        let scope = root.select(&section_sel).next().unwrap_or(root);
        let quotes = parse_bookmaker_rows(scope, labels, options)?;
        if quotes.is_empty() {
            warn!("No {} odds found on {}", market, link);
        }
        record.markets.insert(market.clone(), quotes);
    }

    Ok(record)
}

fn parse_teams(root: ElementRef<'_>) -> Result<(String, String)> {
    let host = selector(r#"[data-testid="game-host"]"#)?;
    let guest = selector(r#"[data-testid="game-guest"]"#)?;
    if let (Some(h), Some(g)) = (root.select(&host).next(), root.select(&guest).next()) {
        return Ok((text_of(h), text_of(g)));
    }

    let names = selector(".participant-name")?;
    let found: Vec<String> = root.select(&names).take(2).map(text_of).collect();
    match found.as_slice() {
        [home, away] => Ok((home.clone(), away.clone())),
        _ => anyhow::bail!("Team names not found on match page"),
    }
}

fn parse_bookmaker_rows(
    scope: ElementRef<'_>,
    labels: &[&str],
    options: &ScrapeOptions,
) -> Result<Vec<BookmakerOdds>> {
    let rows = selector(r#"div[class*="border-black-borders"]"#)?;
    let bold_cells = selector(r#"div[class*="flex-center"][class*="flex-col"][class*="font-bold"]"#)?;
    let text_cells = selector(r#"p[class*="height-content"]"#)?;

    let mut quotes = Vec::new();
    for row in scope.select(&rows) {
        let Some(bookmaker_name) = bookmaker_name(row)? else {
            continue;
        };
        if let Some(target) = &options.target_bookmaker {
            if !bookmaker_name.eq_ignore_ascii_case(target) {
                continue;
            }
        }

        let mut cells: Vec<String> = row.select(&bold_cells).map(text_of).collect();
        if cells.len() < labels.len() {
            cells = row
                .select(&text_cells)
                .map(text_of)
                .filter(|t| looks_like_price(t))
                .collect();
        }
        if cells.len() < labels.len() {
            debug!("Incomplete odds for bookmaker {}, skipping", bookmaker_name);
            continue;
        }

        let odds = labels
            .iter()
            .zip(cells)
            .map(|(label, price)| (label.to_string(), collapse_repeated_price(&price)))
            .collect();
        quotes.push(BookmakerOdds {
            odds,
            bookmaker_name,
            period: options.period.clone(),
        });
    }
    Ok(quotes)
}

/// Logo title first, then a bookmaker-looking image alt, then link text.
fn bookmaker_name(row: ElementRef<'_>) -> Result<Option<String>> {
    let logo = selector("img.bookmaker-logo[title]")?;
    if let Some(title) = row.select(&logo).next().and_then(|img| img.value().attr("title")) {
        return Ok(Some(title.trim().to_string()));
    }

    let imgs = selector("img[alt]")?;
    if let Some(alt) = row
        .select(&imgs)
        .filter_map(|img| img.value().attr("alt"))
        .find(|alt| looks_like_bookmaker(alt))
    {
        return Ok(Some(alt.trim().to_string()));
    }

    let anchors = selector(r#"p[class*="height-content"] a"#)?;
    Ok(row
        .select(&anchors)
        .map(text_of)
        .find(|name| looks_like_bookmaker(name)))
}

fn looks_like_bookmaker(name: &str) -> bool {
    let lower = name.trim().to_lowercase();
    if lower.is_empty() {
        return false;
    }
    BOOKMAKER_HINTS.iter().any(|hint| lower.contains(hint))
        || lower
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| BOOKMAKER_WORDS.contains(&word))
}

/// Decimal ("1.95"), fractional ("5/2") or American ("+150") odds.
fn looks_like_price(text: &str) -> bool {
    let t = text.trim();
    t.chars().any(|c| c.is_ascii_digit())
        && t.chars().all(|c| c.is_ascii_digit() || matches!(c, '.' | '+' | '-' | '/'))
}

/// The live page sometimes renders the old and new price in the same cell
/// ("1.951.95"); keep a single copy.
fn collapse_repeated_price(price: &str) -> String {
    let p = price.trim();
    let half = p.len() / 2;
    if p.len() % 2 == 0 && p.contains('.') && p.is_char_boundary(half) && p[..half] == p[half..] {
        p[..half].to_string()
    } else {
        p.to_string()
    }
}

/// "2:1", "2 - 1" or "2–1"
fn parse_score_pair(text: &str) -> Option<(u32, u32)> {
    let mut parts = text
        .split(|c: char| matches!(c, ':' | '-' | '–'))
        .map(str::trim)
        .filter(|p| !p.is_empty());
    let home = parts.next()?.parse().ok()?;
    let away = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((home, away))
}

/// "(1:0, 0:2)" → [1-0, 0-2]; malformed periods are dropped.
fn parse_partial_results(text: &str) -> Vec<PeriodScore> {
    text.trim()
        .trim_start_matches('(')
        .trim_end_matches(')')
        .split(',')
        .filter_map(parse_score_pair)
        .map(|(home, away)| PeriodScore { home, away })
        .collect()
}
