//! Wires configuration, stores, caches, the authorization engine, and the
//! scan engine into one [`AppCtx`], and assembles the transport-layer
//! routers on top of it.

use std::sync::Arc;
use std::time::Duration;

use sophrosyne_authz::PolicySet;
use sophrosyne_core::config::AppConfig;
use sophrosyne_core::domain::User;
use sophrosyne_core::health::{HealthIndicator, HealthState};
use sophrosyne_scan::ScanEngine;
use sophrosyne_store::{
    CachedCheckStore, CachedProfileStore, CachedUserStore, CheckStore, GatewayStore, ProfileStore,
    UserStore,
};
use sophrosyne_transport::PanicThresholdIndicator;
use tokio_util::sync::CancellationToken;

/// Per-entity-list page size defaults, taken from `services.{users,profiles,checks}.pageSize`.
pub struct PageSizes {
    pub users: u32,
    pub profiles: u32,
    pub checks: u32,
}

/// Request-scoped handler context: the authenticated principal plus shared
/// handles to every store/engine a handler might need. Built once per
/// request by the closure installed in `RpcAppState::ctx_builder`, from
/// `Arc`s captured at startup.
pub struct AppCtx {
    pub principal: Arc<User>,
    pub users: Arc<dyn UserStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub checks: Arc<dyn CheckStore>,
    pub policies: Arc<PolicySet>,
    pub scan_engine: Arc<ScanEngine<dyn ProfileStore, dyn CheckStore>>,
    pub page_sizes: Arc<PageSizes>,
    pub site_key: Arc<Vec<u8>>,
    pub salt: Arc<Vec<u8>>,
    pub cancel: CancellationToken,
}

/// Everything built at startup that outlives any single request.
pub struct App {
    pub config: AppConfig,
    pub store: Arc<GatewayStore>,
    pub users: Arc<dyn UserStore>,
    pub profiles: Arc<dyn ProfileStore>,
    pub checks: Arc<dyn CheckStore>,
    pub policies: Arc<PolicySet>,
    pub scan_engine: Arc<ScanEngine<dyn ProfileStore, dyn CheckStore>>,
    pub page_sizes: Arc<PageSizes>,
    pub health: Arc<HealthState>,
    pub panic_counter: Arc<sophrosyne_transport::PanicCounter>,
    pub site_key: Arc<Vec<u8>>,
    pub salt: Arc<Vec<u8>>,
}

impl App {
    /// Build every shared component from a loaded `AppConfig`. Performs
    /// `GatewayStore::bootstrap_root`, returning the root principal's raw
    /// token (base64-encoded) when the root user was freshly (re)created.
    pub async fn build(config: AppConfig) -> Result<(Self, Option<String>), String> {
        let store = Arc::new(GatewayStore::new());

        let site_key = config.security.site_key.clone().into_bytes();
        let salt = config.security.salt.clone().into_bytes();

        let root_token = store
            .bootstrap_root(
                &config.principals.root.name,
                &config.principals.root.email,
                config.principals.root.recreate,
                &site_key,
                &salt,
                config.development.static_root_token.as_deref(),
            )
            .await
            .map(|raw| {
                use base64::engine::general_purpose::STANDARD;
                use base64::Engine;
                STANDARD.encode(raw)
            });

        let users: Arc<dyn UserStore> = Arc::new(CachedUserStore::new(
            store.clone(),
            Duration::from_secs(config.services.users.cache.ttl),
            Duration::from_secs(config.services.users.cache.cleanup_interval),
        ));
        let profiles: Arc<dyn ProfileStore> = Arc::new(CachedProfileStore::new(
            store.clone(),
            Duration::from_secs(config.services.profiles.cache.ttl),
            Duration::from_secs(config.services.profiles.cache.cleanup_interval),
        ));
        let checks: Arc<dyn CheckStore> = Arc::new(CachedCheckStore::new(
            store.clone(),
            Duration::from_secs(config.services.checks.cache.ttl),
            Duration::from_secs(config.services.checks.cache.cleanup_interval),
        ));

        let policies = Arc::new(load_policies(&config)?);

        let scan_engine: Arc<ScanEngine<dyn ProfileStore, dyn CheckStore>> =
            Arc::new(ScanEngine::new(profiles.clone(), checks.clone()));

        let panic_counter = sophrosyne_transport::PanicCounter::new();
        let health = Arc::new(build_health_state(panic_counter.clone()));

        let page_sizes = Arc::new(PageSizes {
            users: config.services.users.page_size,
            profiles: config.services.profiles.page_size,
            checks: config.services.checks.page_size,
        });

        let app = App {
            config,
            store,
            users,
            profiles,
            checks,
            policies,
            scan_engine,
            page_sizes,
            health,
            panic_counter,
            site_key: Arc::new(site_key),
            salt: Arc::new(salt),
        };
        Ok((app, root_token))
    }

    /// Build the closure `RpcAppState` uses to derive a request-scoped
    /// `AppCtx` from the authenticated principal and that request's
    /// cancellation token (§4.9: dropped before completion, the in-flight
    /// scan's upstream RPCs must unwind).
    pub fn ctx_builder(&self) -> Box<dyn Fn(Arc<User>, CancellationToken) -> Arc<AppCtx> + Send + Sync> {
        let users = self.users.clone();
        let profiles = self.profiles.clone();
        let checks = self.checks.clone();
        let policies = self.policies.clone();
        let scan_engine = self.scan_engine.clone();
        let page_sizes = self.page_sizes.clone();
        let site_key = self.site_key.clone();
        let salt = self.salt.clone();

        Box::new(move |principal: Arc<User>, cancel: CancellationToken| {
            Arc::new(AppCtx {
                principal,
                users: users.clone(),
                profiles: profiles.clone(),
                checks: checks.clone(),
                policies: policies.clone(),
                scan_engine: scan_engine.clone(),
                page_sizes: page_sizes.clone(),
                site_key: site_key.clone(),
                salt: salt.clone(),
                cancel,
            })
        })
    }
}

fn load_policies(config: &AppConfig) -> Result<PolicySet, String> {
    match &config.security.policy_path {
        Some(path) => {
            let yaml = std::fs::read_to_string(path).map_err(|e| format!("reading policy file: {e}"))?;
            PolicySet::from_yaml_str(&yaml).map_err(|e| format!("parsing policy file: {e}"))
        }
        None => Ok(default_policies()),
    }
}

/// Every action defaults to admin-only when no policy file is configured —
/// a deployment with no `security.policyPath` still gets a safe default
/// instead of every principal being denied outright.
fn default_policies() -> PolicySet {
    use sophrosyne_authz::{Effect, PolicyRule, PrincipalMatch};

    let actions = [
        "GetUser", "GetUsers", "CreateUser", "UpdateUser", "DeleteUser", "RotateToken",
        "GetProfile", "GetProfiles", "CreateProfile", "UpdateProfile", "DeleteProfile",
        "GetCheck", "GetChecks", "CreateCheck", "UpdateCheck", "DeleteCheck",
    ];
    let mut rules: Vec<PolicyRule> = actions
        .iter()
        .map(|action| PolicyRule {
            effect: Effect::Allow,
            principals: vec![PrincipalMatch::AnyAdmin],
            actions: vec![(*action).to_string()],
            resource: None,
        })
        .collect();
    rules.push(PolicyRule {
        effect: Effect::Allow,
        principals: vec![PrincipalMatch::Any],
        actions: vec!["PerformScan".to_string()],
        resource: None,
    });
    PolicySet::from_rules(rules)
}

fn build_health_state(panic_counter: Arc<sophrosyne_transport::PanicCounter>) -> HealthState {
    let indicators: Vec<Arc<dyn HealthIndicator>> = vec![Arc::new(PanicThresholdIndicator {
        counter: panic_counter,
        threshold: 1000,
    })];
    HealthState::new(indicators, Some(Duration::from_secs(2)))
}
