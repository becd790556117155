use chrono::NaiveDate;
use metrics_exporter_prometheus::PrometheusHandle;
use rent_payouts::clock::Clock;
use rent_payouts::config::{ConfigProvider, EngineSettings, ServiceConfig};
use rent_payouts::error::{AppError, PayoutError};
use rent_payouts::fraud::{FraudAssessor, FraudRules};
use rent_payouts::payouts::memory::{
    InMemoryAccountDirectory, InMemoryConfigStore, InMemoryEarnings, InMemoryLedger,
    RecordingNotifier, StaticKycGate,
};
use rent_payouts::payouts::{OrchestratorParts, PayoutApi, PayoutCalculator, PayoutOrchestrator};
use rent_payouts::providers::{
    HttpProviderFactory, ProviderFactory, ProviderId, ProviderRegistry, SandboxFactory,
};
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Which integrations the registry hands out.
pub(crate) enum ProviderMode {
    Sandbox(Arc<SandboxFactory>),
    Live(reqwest::Client),
}

/// The payout engine wired to in-memory collaborators.
pub(crate) struct PayoutWorld {
    pub(crate) earnings: Arc<InMemoryEarnings>,
    pub(crate) accounts: Arc<InMemoryAccountDirectory>,
    pub(crate) ledger: Arc<InMemoryLedger>,
    pub(crate) notifier: Arc<RecordingNotifier>,
    pub(crate) api: Arc<PayoutApi>,
}

pub(crate) fn build_world(
    engine: &EngineSettings,
    mode: ProviderMode,
    services: Vec<ServiceConfig>,
    clock: Arc<dyn Clock>,
) -> Result<PayoutWorld, AppError> {
    let default_provider = ProviderId::from_bank_code(&engine.default_provider).ok_or_else(|| {
        PayoutError::Validation(format!(
            "PAYOUT_DEFAULT_PROVIDER '{}' is not a known provider",
            engine.default_provider
        ))
    })?;

    let store = Arc::new(InMemoryConfigStore::default());
    for service in services {
        store.put(service);
    }
    let config = Arc::new(ConfigProvider::new(
        store,
        clock.clone(),
        engine.config_ttl,
    ));

    let factory: Arc<dyn ProviderFactory> = match mode {
        ProviderMode::Sandbox(factory) => factory,
        ProviderMode::Live(client) => Arc::new(HttpProviderFactory::new(client, config.clone())),
    };
    let registry = Arc::new(ProviderRegistry::new(factory, default_provider, clock.clone()));

    let earnings = Arc::new(InMemoryEarnings::default());
    let accounts = Arc::new(InMemoryAccountDirectory::default());
    let ledger = Arc::new(InMemoryLedger::default());
    let notifier = Arc::new(RecordingNotifier::default());

    let orchestrator = PayoutOrchestrator::new(OrchestratorParts {
        config: config.clone(),
        registry,
        ledger: ledger.clone(),
        kyc: Arc::new(StaticKycGate::allowing_all()),
        accounts: accounts.clone(),
        notifier: notifier.clone(),
        fraud: Arc::new(FraudAssessor::new(FraudRules::default())),
        clock: clock.clone(),
    })
    .with_call_timeout(engine.call_timeout);
    let calculator = PayoutCalculator::new(earnings.clone(), config, clock);

    Ok(PayoutWorld {
        earnings,
        accounts,
        ledger,
        notifier,
        api: Arc::new(PayoutApi {
            calculator: Arc::new(calculator),
            orchestrator: Arc::new(orchestrator),
        }),
    })
}

/// Service configurations from a JSON array on disk.
pub(crate) fn load_services(path: &Path) -> Result<Vec<ServiceConfig>, AppError> {
    let raw = std::fs::read_to_string(path)?;
    serde_json::from_str(&raw).map_err(|err| {
        AppError::from(PayoutError::Validation(format!(
            "{} is not a list of service configurations ({err})",
            path.display()
        )))
    })
}

pub(crate) fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|err| format!("failed to parse '{raw}' as YYYY-MM-DD ({err})"))
}
