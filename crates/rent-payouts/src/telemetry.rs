use crate::config::TelemetryConfig;
use std::fmt;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::EnvFilter;

/// Counter incremented once per settled transfer attempt, labelled by outcome and provider.
pub const TRANSFERS_TOTAL: &str = "payouts_transfers_total";
/// Counter incremented per fraud assessment, labelled by risk level.
pub const FRAUD_ASSESSMENTS_TOTAL: &str = "payouts_fraud_assessments_total";
/// Counter incremented per batch, labelled by final status.
pub const BATCHES_TOTAL: &str = "payouts_batches_total";

#[derive(Debug)]
pub enum TelemetryError {
    EnvFilter { value: String, source: ParseError },
    Subscriber(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for TelemetryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelemetryError::EnvFilter { value, .. } => {
                write!(
                    f,
                    "invalid log level/filter '{}': unable to build EnvFilter",
                    value
                )
            }
            TelemetryError::Subscriber(err) => write!(f, "telemetry error: {err}"),
        }
    }
}

impl std::error::Error for TelemetryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TelemetryError::EnvFilter { source, .. } => Some(source),
            TelemetryError::Subscriber(err) => Some(&**err),
        }
    }
}

/// Install the process-wide subscriber. `RUST_LOG` wins over the configured level.
pub fn init(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = build_filter(config)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .with_ansi(false)
        .try_init()
        .map_err(TelemetryError::Subscriber)?;

    describe_metrics();
    Ok(())
}

fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => {
            EnvFilter::try_new(&config.log_level).map_err(|source| TelemetryError::EnvFilter {
                value: config.log_level.clone(),
                source,
            })
        }
    }
}

/// Register help text for the engine's counters with whichever recorder is installed.
pub fn describe_metrics() {
    metrics::describe_counter!(TRANSFERS_TOTAL, "Settled payout transfer attempts");
    metrics::describe_counter!(
        FRAUD_ASSESSMENTS_TOTAL,
        "Fraud assessments grouped by resulting risk level"
    );
    metrics::describe_counter!(BATCHES_TOTAL, "Payout batches grouped by final status");
}
