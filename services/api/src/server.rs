use crate::cli::ServeArgs;
use crate::infra::{build_world, load_services, AppState, ProviderMode};
use crate::routes::with_operational_routes;
use axum::Extension;
use axum_prometheus::PrometheusMetricLayer;
use rent_payouts::clock::{Clock, SystemClock};
use rent_payouts::config::AppConfig;
use rent_payouts::error::AppError;
use rent_payouts::providers::SandboxFactory;
use rent_payouts::telemetry;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) async fn run(mut args: ServeArgs) -> Result<(), AppError> {
    let mut config = AppConfig::load()?;

    if let Some(host) = args.host.take() {
        config.server.host = host;
    }
    if let Some(port) = args.port.take() {
        config.server.port = port;
    }

    telemetry::init(&config.telemetry)?;

    let (prometheus_layer, prometheus_handle) = PrometheusMetricLayer::pair();
    let readiness_flag = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let app_state = AppState {
        readiness: readiness_flag.clone(),
        metrics: Arc::new(prometheus_handle),
    };

    let services = match args.services.as_deref() {
        Some(path) => load_services(path)?,
        None => {
            warn!("no service configuration file given; payouts stay unconfigured");
            Vec::new()
        }
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mode = if args.live {
        ProviderMode::Live(reqwest::Client::new())
    } else {
        ProviderMode::Sandbox(Arc::new(SandboxFactory::new(clock.clone())))
    };
    let world = build_world(&config.engine, mode, services, clock)?;

    let app = with_operational_routes(world.api)
        .layer(Extension(app_state))
        .layer(prometheus_layer);

    let addr = config.server.socket_addr()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    readiness_flag.store(true, Ordering::Release);

    info!(
        ?config.environment,
        %addr,
        live = args.live,
        default_provider = %config.engine.default_provider,
        "payout engine ready"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
