//! CSV backend for the trade recorder.
//!
//! Appends one row per closure record, suitable for the dashboard's
//! flat-file export. File I/O runs on the blocking pool so the feed task
//! never waits on disk.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rust_decimal::Decimal;

use super::recorder::{RecordError, TradeRecorder};
use crate::position::ClosedTrade;

const COLUMNS: [&str; 15] = [
    "trade_id",
    "exit_time",
    "symbol",
    "side",
    "quantity",
    "entry_price",
    "exit_price",
    "pnl",
    "commission",
    "mae",
    "mfe",
    "efficiency",
    "r_multiple",
    "mode",
    "account",
];

fn opt(value: Option<Decimal>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn row(trade: &ClosedTrade) -> String {
    [
        trade.trade_id.clone(),
        trade.exit_time.to_rfc3339(),
        trade.symbol.clone(),
        trade.side.to_string(),
        trade.quantity.to_string(),
        trade.entry_price.to_string(),
        trade.exit_price.to_string(),
        trade.pnl.to_string(),
        trade.commission.to_string(),
        trade.mae.to_string(),
        trade.mfe.to_string(),
        opt(trade.efficiency),
        opt(trade.r_multiple),
        trade.mode.to_string(),
        trade.account.clone(),
    ]
    .join(",")
}

/// Appends closure records to a CSV file, writing the header when the
/// file is new or empty.
pub struct CsvRecorder {
    path: Arc<PathBuf>,
    /// Serializes appends so rows from overlapping closures never
    /// interleave
    write_lock: Arc<Mutex<()>>,
}

impl CsvRecorder {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path: Arc::new(path),
            write_lock: Arc::new(Mutex::new(())),
        }
    }
}

#[async_trait]
impl TradeRecorder for CsvRecorder {
    async fn record(&self, trade: &ClosedTrade) -> Result<(), RecordError> {
        let path = Arc::clone(&self.path);
        let lock = Arc::clone(&self.write_lock);
        let line = row(trade);

        tokio::task::spawn_blocking(move || {
            let _guard = lock.lock().unwrap_or_else(|e| e.into_inner());
            let mut file = OpenOptions::new().create(true).append(true).open(&*path)?;
            if file.metadata()?.len() == 0 {
                writeln!(file, "{}", COLUMNS.join(","))?;
            }
            writeln!(file, "{}", line)?;
            Ok::<(), RecordError>(())
        })
        .await
        .map_err(|e| RecordError::Io(std::io::Error::other(e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::position::{InstrumentSpec, PositionSnapshot};
    use crate::types::Mode;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_header_written_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trades.csv");
        let recorder = CsvRecorder::new(path.clone());

        let mut pos =
            PositionSnapshot::new("MES", dec!(2), dec!(5000), Some(Utc::now()), Mode::Sim, "Sim1");
        pos.track_price(dec!(5012));
        let trade =
            ClosedTrade::from_snapshot(&pos, dec!(5010), Utc::now(), &InstrumentSpec::default());

        recorder.record(&trade).await.unwrap();
        recorder.record(&trade).await.unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("trade_id,"));
        assert!(lines[1].contains("MES"));
        assert!(lines[1].contains("SIM"));
    }

    #[test]
    fn test_row_has_one_field_per_column() {
        let pos =
            PositionSnapshot::new("MES", dec!(1), dec!(5000), Some(Utc::now()), Mode::Sim, "Sim1");
        let trade =
            ClosedTrade::from_snapshot(&pos, dec!(5000), Utc::now(), &InstrumentSpec::default());

        assert_eq!(row(&trade).split(',').count(), COLUMNS.len());
    }
}
