//! Closed-trade recording.
//!
//! `TradeRecorder` is the delivery seam for closure records. Backends are
//! best-effort: a recording failure is logged and counted, never allowed
//! back into the event path.

use async_trait::async_trait;
use thiserror::Error;

use crate::position::ClosedTrade;

/// Errors from a recording backend.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record rejected: {0}")]
    Backend(String),
}

/// Delivery seam for closure records.
#[async_trait]
pub trait TradeRecorder: Send + Sync {
    /// Deliver one closure record. Must not block the caller on disk.
    async fn record(&self, trade: &ClosedTrade) -> Result<(), RecordError>;

    /// Flush buffered records, if the backend buffers at all.
    async fn flush(&self) -> Result<(), RecordError> {
        Ok(())
    }
}

/// Fans one closure record out to every configured backend.
///
/// Delivery is best effort: a failing backend is logged and skipped, and
/// the call as a whole only errors when no backend accepted the record.
pub struct MultiRecorder {
    backends: Vec<Box<dyn TradeRecorder>>,
}

impl MultiRecorder {
    pub fn new(backends: Vec<Box<dyn TradeRecorder>>) -> Self {
        Self { backends }
    }

    pub fn add(&mut self, backend: Box<dyn TradeRecorder>) {
        self.backends.push(backend);
    }
}

#[async_trait]
impl TradeRecorder for MultiRecorder {
    async fn record(&self, trade: &ClosedTrade) -> Result<(), RecordError> {
        let mut delivered = 0usize;
        let mut failure = None;

        for backend in &self.backends {
            match backend.record(trade).await {
                Ok(()) => delivered += 1,
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        trade_id = %trade.trade_id,
                        "Trade record backend failed"
                    );
                    failure = Some(e);
                }
            }
        }

        match failure {
            Some(e) if delivered == 0 => Err(e),
            _ => Ok(()),
        }
    }

    async fn flush(&self) -> Result<(), RecordError> {
        for backend in &self.backends {
            backend.flush().await?;
        }
        Ok(())
    }
}

/// Emits each closure record as a structured log event.
///
/// Cheap enough to keep enabled everywhere; pairs with `CsvRecorder`
/// behind a `MultiRecorder`.
pub struct TracingRecorder;

#[async_trait]
impl TradeRecorder for TracingRecorder {
    async fn record(&self, trade: &ClosedTrade) -> Result<(), RecordError> {
        tracing::info!(
            trade_id = %trade.trade_id,
            symbol = %trade.symbol,
            side = %trade.side,
            quantity = %trade.quantity,
            entry = %trade.entry_price,
            exit = %trade.exit_price,
            pnl = %trade.pnl,
            commission = %trade.commission,
            mae = %trade.mae,
            mfe = %trade.mfe,
            mode = %trade.mode,
            account = %trade.account,
            "Trade closed"
        );
        Ok(())
    }
}
