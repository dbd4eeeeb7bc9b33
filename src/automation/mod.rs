//! Automation session manager.
//!
//! Owns a pool of logged-in browser sessions keyed by (service,
//! credential) and executes scrapes against them. Sessions are reused
//! across consecutive runs sharing a credential and evicted on idle
//! timeout, age, use count, login failure, or anti-bot block.

#[cfg(feature = "browser")]
pub mod browser;
mod error;
mod page;
mod session;
pub mod strategy;

#[cfg(feature = "browser")]
pub use browser::BrowserDriver;
pub use error::ScrapeError;
pub use page::{AutomationDriver, AutomationPage};
pub use session::{Session, SessionLimits, SessionState};
pub use strategy::{SiteStrategy, StrategyConfig, StrategyRegistry};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::AutomationSettings;
use crate::models::{Credentials, RawListing, SearchConfig, Service};
use crate::rate_limit::ServiceGates;

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
struct SessionKey {
    service_id: String,
    credential_id: i32,
}

type SessionSlot = Arc<Mutex<Option<Session>>>;

/// Pool of authenticated sessions plus the execution entry point.
pub struct SessionManager {
    driver: Arc<dyn AutomationDriver>,
    registry: StrategyRegistry,
    gates: ServiceGates,
    limits: SessionLimits,
    max_pages: u32,
    max_items: usize,
    sessions: Mutex<HashMap<SessionKey, SessionSlot>>,
}

impl SessionManager {
    pub fn new(
        driver: Arc<dyn AutomationDriver>,
        registry: StrategyRegistry,
        gates: ServiceGates,
        settings: &AutomationSettings,
    ) -> Self {
        Self {
            driver,
            registry,
            gates,
            limits: SessionLimits {
                idle: Duration::from_secs(settings.session_idle_secs),
                max_age: Duration::from_secs(settings.session_max_age_secs),
                max_uses: settings.session_max_uses,
            },
            max_pages: settings.max_pages_per_run.max(1),
            max_items: settings.max_items_per_run.max(1),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Execute one scrape for a config using the given credential.
    ///
    /// Acquires the per-service gate before any network action. Login
    /// failures surface as `ScrapeError::Credential` without in-call
    /// retry; the scheduler's backoff governs the retry cadence. Nothing
    /// is persisted here.
    pub async fn execute(
        &self,
        service: &Service,
        credential_id: i32,
        creds: &Credentials,
        config: &SearchConfig,
    ) -> Result<Vec<RawListing>, ScrapeError> {
        let strategy = self.registry.get(&service.login_flow).ok_or_else(|| {
            ScrapeError::Parse(format!(
                "no strategy registered for login flow '{}'",
                service.login_flow
            ))
        })?;

        let gate = self.gates.gate(&service.id).await;
        let _permit = gate.acquire().await;

        let slot = self
            .slot(SessionKey {
                service_id: service.id.clone(),
                credential_id,
            })
            .await;
        // Exclusive ownership: one in-flight execution per session.
        let mut guard = slot.lock().await;

        let evict_reason = guard
            .as_ref()
            .and_then(|session| session.eviction_reason(&self.limits));
        if let Some(reason) = evict_reason {
            debug!(service = %service.id, reason, "evicting session");
            if let Some(mut old) = guard.take() {
                old.state = SessionState::Evicted;
                old.page.close().await;
            }
        }

        if guard.is_none() {
            let page = self.driver.new_page().await?;
            let mut session = Session::new(page);
            session.state = SessionState::LoggingIn;

            if let Err(e) = strategy
                .login(session.page.as_mut(), service, creds)
                .await
            {
                session.state = SessionState::Evicted;
                session.page.close().await;
                if matches!(e, ScrapeError::Blocked(_)) {
                    gate.report_blocked().await;
                }
                warn!(service = %service.id, error = %e, "session login failed");
                return Err(e);
            }

            session.state = SessionState::Ready;
            *guard = Some(session);
        }

        let session = guard.as_mut().expect("session present");
        session.state = SessionState::Executing;

        let result = self
            .walk_result_pages(strategy.as_ref(), session, service, config)
            .await;

        match result {
            Ok(records) => {
                guard.as_mut().expect("session present").mark_used();
                gate.report_success().await;
                Ok(records)
            }
            Err(e @ ScrapeError::Blocked(_)) => {
                // Blocked sessions are burned; back the whole service off.
                let mut old = guard.take().expect("session present");
                old.state = SessionState::Evicted;
                old.page.close().await;
                gate.report_blocked().await;
                Err(e)
            }
            Err(e) => {
                // Transient/parse failures keep the session for the next run.
                guard.as_mut().expect("session present").state = SessionState::Ready;
                Err(e)
            }
        }
    }

    /// Walk result pages until the page/item caps or an empty page.
    async fn walk_result_pages(
        &self,
        strategy: &dyn SiteStrategy,
        session: &mut Session,
        service: &Service,
        config: &SearchConfig,
    ) -> Result<Vec<RawListing>, ScrapeError> {
        let mut records: Vec<RawListing> = Vec::new();

        'pages: for page_index in 0..self.max_pages {
            let url = strategy.search_url(service, config, page_index);
            session.page.goto(&url).await?;
            let html = session.page.content().await?;

            if strategy.detect_block(&html) {
                return Err(ScrapeError::Blocked(format!("challenge page at {}", url)));
            }

            let parsed = strategy.parse_listings(&html)?;
            if parsed.is_empty() {
                break;
            }
            for record in parsed {
                records.push(record);
                if records.len() >= self.max_items {
                    break 'pages;
                }
            }
        }

        Ok(records)
    }

    /// Close and drop every pooled session.
    pub async fn close_all(&self) {
        let slots: Vec<SessionSlot> = {
            let mut sessions = self.sessions.lock().await;
            sessions.drain().map(|(_, slot)| slot).collect()
        };
        for slot in slots {
            let mut guard = slot.lock().await;
            if let Some(mut session) = guard.take() {
                session.state = SessionState::Evicted;
                session.page.close().await;
            }
        }
    }

    async fn slot(&self, key: SessionKey) -> SessionSlot {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(key).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::strategy::{
        ListingSelectors, LoginFlowConfig, SearchFlowConfig, SelectorStrategy, StrategyConfig,
    };
    use super::*;
    use crate::config::RateLimitSettings;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    const LOGIN_FORM: &str = r#"<form id="login"><input id="email"><input id="password"></form>"#;
    const LOGGED_IN: &str = r#"<div class="account-menu">alice</div>"#;
    const LOGIN_REJECTED: &str = r#"<p>Invalid email or password</p>"#;
    const CHALLENGE: &str = r#"<div id="captcha-box">prove you are human</div>"#;
    const RESULTS: &str = r#"
        <div class="ad-item" data-adid="101">
            <a class="ad-link" href="/item/101"><span class="ad-title">Bike one</span></a>
            <span class="ad-price">100 €</span>
        </div>
        <div class="ad-item" data-adid="102">
            <a class="ad-link" href="/item/102"><span class="ad-title">Bike two</span></a>
            <span class="ad-price">200 €</span>
        </div>
    "#;
    const EMPTY_RESULTS: &str = r#"<div class="no-results">Nothing found</div>"#;

    #[derive(Default)]
    struct FakeState {
        pages_created: AtomicUsize,
        submits: AtomicUsize,
        login_fail: AtomicBool,
        blocked: AtomicBool,
        goto_delay_ms: AtomicUsize,
        concurrent: AtomicUsize,
        peak_concurrent: AtomicUsize,
    }

    struct FakePage {
        st: Arc<FakeState>,
        last_url: String,
        submitted: bool,
    }

    #[async_trait]
    impl AutomationPage for FakePage {
        async fn goto(&mut self, url: &str) -> Result<(), ScrapeError> {
            let live = self.st.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.st.peak_concurrent.fetch_max(live, Ordering::SeqCst);
            let delay = self.st.goto_delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay as u64)).await;
            }
            self.st.concurrent.fetch_sub(1, Ordering::SeqCst);
            self.last_url = url.to_string();
            Ok(())
        }

        async fn content(&mut self) -> Result<String, ScrapeError> {
            if self.st.blocked.load(Ordering::SeqCst) {
                return Ok(CHALLENGE.to_string());
            }
            if self.last_url.contains("/login") {
                if !self.submitted {
                    return Ok(LOGIN_FORM.to_string());
                }
                if self.st.login_fail.load(Ordering::SeqCst) {
                    return Ok(LOGIN_REJECTED.to_string());
                }
                return Ok(LOGGED_IN.to_string());
            }
            if self.last_url.contains("page=") {
                return Ok(EMPTY_RESULTS.to_string());
            }
            Ok(RESULTS.to_string())
        }

        async fn fill(&mut self, _selector: &str, _value: &str) -> Result<(), ScrapeError> {
            Ok(())
        }

        async fn click(&mut self, _selector: &str) -> Result<(), ScrapeError> {
            self.submitted = true;
            self.st.submits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn current_url(&mut self) -> Result<String, ScrapeError> {
            Ok(self.last_url.clone())
        }

        async fn close(&mut self) {}
    }

    struct FakeDriver {
        st: Arc<FakeState>,
    }

    #[async_trait]
    impl AutomationDriver for FakeDriver {
        async fn new_page(&self) -> Result<Box<dyn AutomationPage>, ScrapeError> {
            self.st.pages_created.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(FakePage {
                st: self.st.clone(),
                last_url: String::new(),
                submitted: false,
            }))
        }
    }

    fn strategy_config() -> StrategyConfig {
        StrategyConfig {
            login: LoginFlowConfig {
                path: "/login".to_string(),
                username_selector: "#email".to_string(),
                password_selector: "#password".to_string(),
                submit_selector: "button".to_string(),
                success_selector: ".account-menu".to_string(),
                failure_marker: Some("Invalid email or password".to_string()),
            },
            search: SearchFlowConfig {
                path_template: "/search?q={keywords}".to_string(),
                page_param: Some("page".to_string()),
            },
            listing: ListingSelectors {
                item: ".ad-item".to_string(),
                external_id_attr: Some("data-adid".to_string()),
                title: ".ad-title".to_string(),
                url: "a.ad-link".to_string(),
                price: Some(".ad-price".to_string()),
                phone: None,
                image: None,
                currency: Some("EUR".to_string()),
            },
            block_markers: vec!["captcha-box".to_string()],
        }
    }

    fn manager(st: Arc<FakeState>, automation: AutomationSettings) -> SessionManager {
        let mut registry = StrategyRegistry::default();
        registry.register(
            "form-login",
            Arc::new(SelectorStrategy::new(strategy_config())),
        );

        let rate = RateLimitSettings {
            default_concurrency: 1,
            actions_per_minute: 6000,
            ..Default::default()
        };

        SessionManager::new(
            Arc::new(FakeDriver { st }),
            registry,
            ServiceGates::new(rate),
            &automation,
        )
    }

    fn service() -> Service {
        Service::new(
            "svc".to_string(),
            "Example Market".to_string(),
            "https://market.example".to_string(),
            "form-login".to_string(),
        )
    }

    fn creds() -> Credentials {
        Credentials {
            username: "alice".to_string(),
            password: "secret".to_string(),
        }
    }

    fn search() -> SearchConfig {
        SearchConfig::new(
            "user-1".to_string(),
            "svc".to_string(),
            vec!["bike".to_string()],
            60,
            0,
        )
    }

    #[tokio::test]
    async fn test_execute_extracts_listings() {
        let st = Arc::new(FakeState::default());
        let mgr = manager(st.clone(), AutomationSettings::default());

        let records = mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].external_id.as_deref(), Some("101"));
        assert_eq!(st.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_is_reused_across_runs() {
        let st = Arc::new(FakeState::default());
        let mgr = manager(st.clone(), AutomationSettings::default());

        mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();
        mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();

        // One page, one login for both runs
        assert_eq!(st.pages_created.load(Ordering::SeqCst), 1);
        assert_eq!(st.submits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_session_evicted_after_max_uses() {
        let st = Arc::new(FakeState::default());
        let automation = AutomationSettings {
            session_max_uses: 1,
            ..Default::default()
        };
        let mgr = manager(st.clone(), automation);

        mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();
        mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();

        // Second run had to build and log in a fresh session
        assert_eq!(st.pages_created.load(Ordering::SeqCst), 2);
        assert_eq!(st.submits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_login_failure_is_credential_error() {
        let st = Arc::new(FakeState::default());
        st.login_fail.store(true, Ordering::SeqCst);
        let mgr = manager(st.clone(), AutomationSettings::default());

        let err = mgr
            .execute(&service(), 1, &creds(), &search())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Credential(_)));

        // No retry within the call; the next execute logs in again
        st.login_fail.store(false, Ordering::SeqCst);
        mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();
        assert_eq!(st.submits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_block_evicts_session_and_penalizes_gate() {
        let st = Arc::new(FakeState::default());
        let mgr = manager(st.clone(), AutomationSettings::default());

        mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();

        st.blocked.store(true, Ordering::SeqCst);
        let err = mgr
            .execute(&service(), 1, &creds(), &search())
            .await
            .unwrap_err();
        assert!(matches!(err, ScrapeError::Blocked(_)));

        let gate = mgr.gates.gate("svc").await;
        assert!(gate.penalty().await > Duration::ZERO);

        // Session was burned: the next run needs a fresh page + login
        st.blocked.store(false, Ordering::SeqCst);
        mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();
        assert_eq!(st.pages_created.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_item_cap_bounds_extraction() {
        let st = Arc::new(FakeState::default());
        let automation = AutomationSettings {
            max_items_per_run: 1,
            ..Default::default()
        };
        let mgr = manager(st.clone(), automation);

        let records = mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_gate_bounds_concurrent_executions() {
        let st = Arc::new(FakeState::default());
        st.goto_delay_ms.store(20, Ordering::SeqCst);
        let mgr = Arc::new(manager(st.clone(), AutomationSettings::default()));

        let mut handles = Vec::new();
        for credential_id in 0..4 {
            let mgr = mgr.clone();
            handles.push(tokio::spawn(async move {
                mgr.execute(&service(), credential_id, &creds(), &search())
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Gate concurrency is 1 for the service: navigations never overlap
        assert_eq!(st.peak_concurrent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unknown_login_flow_is_parse_error() {
        let st = Arc::new(FakeState::default());
        let mgr = manager(st, AutomationSettings::default());

        let mut svc = service();
        svc.login_flow = "oauth-popup".to_string();
        let err = mgr.execute(&svc, 1, &creds(), &search()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::Parse(_)));
    }

    #[tokio::test]
    async fn test_close_all_drops_sessions() {
        let st = Arc::new(FakeState::default());
        let mgr = manager(st.clone(), AutomationSettings::default());

        mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();
        mgr.close_all().await;

        mgr.execute(&service(), 1, &creds(), &search()).await.unwrap();
        assert_eq!(st.pages_created.load(Ordering::SeqCst), 2);
    }
}
