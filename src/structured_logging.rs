//! Structured logging setup and per-flow event logging

use crate::config::LoggingConfig;
use crate::observability::CorrelationId;
use alloy_primitives::{Address, TxHash, U256};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level. Calling this twice returns an
/// error instead of panicking.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json().with_target(true))
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_target(true))
            .try_init()?;
    }

    Ok(())
}

/// Structured logger for one transaction flow invocation
#[derive(Debug, Clone)]
pub struct FlowLogger {
    context_id: CorrelationId,
    flow: &'static str,
}

impl FlowLogger {
    pub fn new(flow: &'static str) -> Self {
        Self {
            context_id: CorrelationId::new(),
            flow,
        }
    }

    pub fn context_id(&self) -> &CorrelationId {
        &self.context_id
    }

    pub fn log_started(&self, account: Address, target: Address, amount: U256) {
        tracing::info!(
            context_id = %self.context_id,
            flow = self.flow,
            account = %account,
            target = %target,
            amount = %amount,
            "Flow started"
        );
    }

    pub fn log_allowance(&self, allowance: U256, required: U256) {
        tracing::debug!(
            context_id = %self.context_id,
            flow = self.flow,
            allowance = %allowance,
            required = %required,
            sufficient = allowance >= required,
            "Allowance checked"
        );
    }

    pub fn log_tx_submitted(&self, call: &str, tx: TxHash) {
        tracing::info!(
            context_id = %self.context_id,
            flow = self.flow,
            call = call,
            tx = %tx,
            "Transaction submitted"
        );
    }

    pub fn log_tx_confirmed(&self, call: &str, tx: TxHash, block: Option<u64>) {
        tracing::info!(
            context_id = %self.context_id,
            flow = self.flow,
            call = call,
            tx = %tx,
            block = ?block,
            "Transaction confirmed"
        );
    }

    pub fn log_succeeded(&self, tx: TxHash, latency_ms: u64) {
        tracing::info!(
            context_id = %self.context_id,
            flow = self.flow,
            tx = %tx,
            latency_ms,
            "Flow completed"
        );
    }

    pub fn log_failed(&self, error: &str, latency_ms: u64) {
        tracing::warn!(
            context_id = %self.context_id,
            flow = self.flow,
            error = %error,
            latency_ms,
            "Flow failed"
        );
    }
}
