//! Per-service scraping strategies.
//!
//! Query translation and page parsing differ per marketplace, so they sit
//! behind the [`SiteStrategy`] trait, selected by the service's login-flow
//! identifier. [`SelectorStrategy`] covers form-login sites that can be
//! described declaratively with CSS selectors; bespoke sites implement the
//! trait directly.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use super::error::ScrapeError;
use super::page::AutomationPage;
use crate::models::{Credentials, RawListing, SearchConfig, Service};

/// Strategy interface for one marketplace.
#[async_trait]
pub trait SiteStrategy: Send + Sync {
    /// Log the page's session in. Must leave the page authenticated or
    /// return `ScrapeError::Credential`.
    async fn login(
        &self,
        page: &mut dyn AutomationPage,
        service: &Service,
        creds: &Credentials,
    ) -> Result<(), ScrapeError>;

    /// Build the search URL for one result page (0-based).
    fn search_url(&self, service: &Service, config: &SearchConfig, page_index: u32) -> String;

    /// Extract listing snapshots from a result page.
    fn parse_listings(&self, html: &str) -> Result<Vec<RawListing>, ScrapeError>;

    /// Whether the page is an anti-bot challenge/interstitial.
    fn detect_block(&self, html: &str) -> bool;
}

/// Declarative configuration for [`SelectorStrategy`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub login: LoginFlowConfig,
    pub search: SearchFlowConfig,
    pub listing: ListingSelectors,
    /// Substrings that identify a challenge/interstitial page.
    #[serde(default)]
    pub block_markers: Vec<String>,
}

/// Login form description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginFlowConfig {
    /// Login page path, relative to the service base URL.
    pub path: String,
    pub username_selector: String,
    pub password_selector: String,
    pub submit_selector: String,
    /// Selector present only when logged in.
    pub success_selector: String,
    /// Substring shown on rejected logins (optional fast path).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_marker: Option<String>,
}

/// Search URL description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchFlowConfig {
    /// Path template with `{keywords}`, `{price_min}`, `{price_max}`,
    /// `{location}` placeholders, relative to the base URL.
    pub path_template: String,
    /// Query parameter carrying the result page number, if paginated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_param: Option<String>,
}

/// CSS selectors for listing extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingSelectors {
    /// One element per listing.
    pub item: String,
    /// Attribute on the item element holding the external id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id_attr: Option<String>,
    pub title: String,
    /// Element whose `href` is the listing URL (often same as title).
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Elements whose `src` are listing images.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// ISO currency attached to parsed prices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
}

/// Selector-driven strategy implementation.
pub struct SelectorStrategy {
    config: StrategyConfig,
}

impl SelectorStrategy {
    pub fn new(config: StrategyConfig) -> Self {
        Self { config }
    }

    fn selector(&self, raw: &str) -> Result<Selector, ScrapeError> {
        Selector::parse(raw)
            .map_err(|_| ScrapeError::Parse(format!("invalid selector: {}", raw)))
    }
}

#[async_trait]
impl SiteStrategy for SelectorStrategy {
    async fn login(
        &self,
        page: &mut dyn AutomationPage,
        service: &Service,
        creds: &Credentials,
    ) -> Result<(), ScrapeError> {
        let login_url = join_url(&service.base_url, &self.config.login.path);
        page.goto(&login_url).await?;

        let html = page.content().await?;
        if self.detect_block(&html) {
            return Err(ScrapeError::Blocked("challenge on login page".to_string()));
        }

        page.fill(&self.config.login.username_selector, &creds.username)
            .await?;
        page.fill(&self.config.login.password_selector, &creds.password)
            .await?;
        page.click(&self.config.login.submit_selector).await?;

        let html = page.content().await?;
        if self.detect_block(&html) {
            return Err(ScrapeError::Blocked("challenge after login".to_string()));
        }
        if let Some(ref marker) = self.config.login.failure_marker {
            if html.contains(marker.as_str()) {
                return Err(ScrapeError::Credential("login rejected".to_string()));
            }
        }

        let success = self.selector(&self.config.login.success_selector)?;
        let logged_in = Html::parse_document(&html).select(&success).next().is_some();
        if !logged_in {
            return Err(ScrapeError::Credential(
                "login did not reach an authenticated page".to_string(),
            ));
        }

        Ok(())
    }

    fn search_url(&self, service: &Service, config: &SearchConfig, page_index: u32) -> String {
        let keywords = config.keywords.join(" ");
        let mut path = self
            .config
            .search
            .path_template
            .replace("{keywords}", &urlencoding::encode(&keywords))
            .replace(
                "{price_min}",
                &config.price_min.map(|p| p.to_string()).unwrap_or_default(),
            )
            .replace(
                "{price_max}",
                &config.price_max.map(|p| p.to_string()).unwrap_or_default(),
            )
            .replace(
                "{location}",
                &config
                    .location
                    .as_deref()
                    .map(|l| urlencoding::encode(l).into_owned())
                    .unwrap_or_default(),
            );

        // Custom filters become plain query parameters
        for (key, value) in &config.custom_filters {
            let value = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            let sep = if path.contains('?') { '&' } else { '?' };
            path.push(sep);
            path.push_str(&urlencoding::encode(key));
            path.push('=');
            path.push_str(&urlencoding::encode(&value));
        }

        if page_index > 0 {
            if let Some(ref param) = self.config.search.page_param {
                let sep = if path.contains('?') { '&' } else { '?' };
                path.push(sep);
                path.push_str(param);
                path.push('=');
                path.push_str(&(page_index + 1).to_string());
            }
        }

        join_url(&service.base_url, &path)
    }

    fn parse_listings(&self, html: &str) -> Result<Vec<RawListing>, ScrapeError> {
        let item_sel = self.selector(&self.config.listing.item)?;
        let title_sel = self.selector(&self.config.listing.title)?;
        let url_sel = self.selector(&self.config.listing.url)?;
        let price_sel = match self.config.listing.price {
            Some(ref raw) => Some(self.selector(raw)?),
            None => None,
        };
        let phone_sel = match self.config.listing.phone {
            Some(ref raw) => Some(self.selector(raw)?),
            None => None,
        };
        let image_sel = match self.config.listing.image {
            Some(ref raw) => Some(self.selector(raw)?),
            None => None,
        };

        let document = Html::parse_document(html);
        let mut listings = Vec::new();

        for item in document.select(&item_sel) {
            let title = match item.select(&title_sel).next() {
                Some(el) => collapse_whitespace(&el.text().collect::<String>()),
                None => continue, // skeleton/ad slots without content
            };

            let url = item
                .select(&url_sel)
                .next()
                .and_then(|el| el.value().attr("href"))
                .map(|href| href.to_string());
            let Some(url) = url else { continue };

            let external_id = self
                .config
                .listing
                .external_id_attr
                .as_deref()
                .and_then(|attr| item.value().attr(attr))
                .map(|v| v.to_string());

            let price = price_sel.as_ref().and_then(|sel| {
                item.select(sel)
                    .next()
                    .and_then(|el| parse_price(&el.text().collect::<String>()))
            });

            let phone = phone_sel.as_ref().and_then(|sel| {
                item.select(sel)
                    .next()
                    .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            });

            let image_urls = image_sel
                .as_ref()
                .map(|sel| {
                    item.select(sel)
                        .filter_map(|el| el.value().attr("src"))
                        .map(|s| s.to_string())
                        .collect()
                })
                .unwrap_or_default();

            listings.push(RawListing {
                external_id,
                title,
                price,
                currency: price.and(self.config.listing.currency.clone()),
                url,
                phone,
                image_urls,
            });
        }

        Ok(listings)
    }

    fn detect_block(&self, html: &str) -> bool {
        self.config
            .block_markers
            .iter()
            .any(|marker| html.contains(marker.as_str()))
    }
}

/// Registry of strategies keyed by login-flow identifier.
#[derive(Clone, Default)]
pub struct StrategyRegistry {
    strategies: HashMap<String, Arc<dyn SiteStrategy>>,
}

impl StrategyRegistry {
    /// Build selector strategies from settings.
    pub fn from_configs(configs: &HashMap<String, StrategyConfig>) -> Self {
        let mut registry = Self::default();
        for (login_flow, config) in configs {
            registry.register(login_flow, Arc::new(SelectorStrategy::new(config.clone())));
        }
        registry
    }

    /// Register a strategy, replacing any existing one for the flow.
    pub fn register(&mut self, login_flow: &str, strategy: Arc<dyn SiteStrategy>) {
        self.strategies.insert(login_flow.to_string(), strategy);
    }

    /// Strategy for a login flow.
    pub fn get(&self, login_flow: &str) -> Option<Arc<dyn SiteStrategy>> {
        self.strategies.get(login_flow).cloned()
    }
}

/// Join a base URL and a path, tolerating stray slashes.
fn join_url(base: &str, path: &str) -> String {
    if path.starts_with("http://") || path.starts_with("https://") {
        return path.to_string();
    }
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Parse a human price string ("1.200 €", "€ 1,200", "450") into minor
/// units. Whole-unit prices only; separators are treated as grouping.
fn parse_price(text: &str) -> Option<i64> {
    let digits: String = text.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<i64>().ok().map(|units| units * 100)
}

/// Trim and collapse runs of whitespace into single spaces.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strategy() -> SelectorStrategy {
        SelectorStrategy::new(StrategyConfig {
            login: LoginFlowConfig {
                path: "/login".to_string(),
                username_selector: "#email".to_string(),
                password_selector: "#password".to_string(),
                submit_selector: "button[type=submit]".to_string(),
                success_selector: ".account-menu".to_string(),
                failure_marker: Some("Invalid email or password".to_string()),
            },
            search: SearchFlowConfig {
                path_template: "/search?q={keywords}&min={price_min}&max={price_max}&loc={location}"
                    .to_string(),
                page_param: Some("page".to_string()),
            },
            listing: ListingSelectors {
                item: ".ad-item".to_string(),
                external_id_attr: Some("data-adid".to_string()),
                title: ".ad-title".to_string(),
                url: "a.ad-link".to_string(),
                price: Some(".ad-price".to_string()),
                phone: None,
                image: Some("img.ad-thumb".to_string()),
                currency: Some("EUR".to_string()),
            },
            block_markers: vec!["cf-challenge".to_string(), "captcha-box".to_string()],
        })
    }

    fn service() -> Service {
        Service::new(
            "svc".to_string(),
            "Example Market".to_string(),
            "https://market.example".to_string(),
            "form-login".to_string(),
        )
    }

    fn config() -> SearchConfig {
        let mut c = SearchConfig::new(
            "user-1".to_string(),
            "svc".to_string(),
            vec!["road".to_string(), "bike".to_string()],
            60,
            0,
        );
        c.price_min = Some(100);
        c.price_max = Some(900);
        c.location = Some("Berlin".to_string());
        c
    }

    const RESULT_PAGE: &str = r#"
        <html><body>
        <div class="ad-item" data-adid="101">
            <a class="ad-link" href="/item/101"><span class="ad-title">Trek  520
                touring</span></a>
            <span class="ad-price">1.200 €</span>
            <img class="ad-thumb" src="https://cdn.example/1.jpg">
        </div>
        <div class="ad-item" data-adid="102">
            <a class="ad-link" href="/item/102"><span class="ad-title">Surly LHT</span></a>
            <span class="ad-price">VB 850 €</span>
        </div>
        <div class="ad-item"><!-- sponsored slot, no content --></div>
        </body></html>
    "#;

    #[test]
    fn test_search_url_translation() {
        let url = strategy().search_url(&service(), &config(), 0);
        assert_eq!(
            url,
            "https://market.example/search?q=road%20bike&min=100&max=900&loc=Berlin"
        );
    }

    #[test]
    fn test_search_url_pagination_and_filters() {
        let mut c = config();
        c.custom_filters
            .insert("condition".to_string(), serde_json::json!("used"));
        let url = strategy().search_url(&service(), &c, 2);
        assert!(url.contains("condition=used"));
        assert!(url.contains("page=3"));
    }

    #[test]
    fn test_parse_listings() {
        let listings = strategy().parse_listings(RESULT_PAGE).unwrap();
        assert_eq!(listings.len(), 2);

        let first = &listings[0];
        assert_eq!(first.external_id.as_deref(), Some("101"));
        assert_eq!(first.title, "Trek 520 touring");
        assert_eq!(first.price, Some(120_000));
        assert_eq!(first.currency.as_deref(), Some("EUR"));
        assert_eq!(first.url, "/item/101");
        assert_eq!(first.image_urls, vec!["https://cdn.example/1.jpg"]);

        assert_eq!(listings[1].price, Some(85_000));
        assert!(listings[1].image_urls.is_empty());
    }

    #[test]
    fn test_detect_block() {
        let s = strategy();
        assert!(s.detect_block("<div id=\"cf-challenge\">prove you are human</div>"));
        assert!(!s.detect_block(RESULT_PAGE));
    }

    #[test]
    fn test_parse_price() {
        assert_eq!(parse_price("1.200 €"), Some(120_000));
        assert_eq!(parse_price("€ 45"), Some(4_500));
        assert_eq!(parse_price("VB"), None);
        assert_eq!(parse_price(""), None);
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("https://a.example/", "/b"), "https://a.example/b");
        assert_eq!(join_url("https://a.example", "b"), "https://a.example/b");
        assert_eq!(
            join_url("https://a.example", "https://other.example/x"),
            "https://other.example/x"
        );
    }

    #[test]
    fn test_registry_dispatch() {
        let mut configs = HashMap::new();
        configs.insert("form-login".to_string(), StrategyConfig::default());
        let registry = StrategyRegistry::from_configs(&configs);

        assert!(registry.get("form-login").is_some());
        assert!(registry.get("oauth-popup").is_none());
    }
}
