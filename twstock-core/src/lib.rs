//! twstock core: incremental TWSE daily-price ingestion.
//!
//! This crate contains the whole pipeline:
//! - Field normalization (Minguo calendar dates, thousands-separated numbers)
//! - TWSE `STOCK_DAY` fetcher with transient-error retry
//! - Table store trait with Parquet and in-memory backends
//! - Watermark resolution and month-paged incremental loading
//! - Backup/swap/cleanup publisher with interrupted-swap recovery
//! - The orchestrator that sequences all of the above for a ticker list

pub mod config;
pub mod data;
pub mod pipeline;
pub mod publish;
pub mod record;
pub mod schema;
pub mod store;
pub mod watermark;

pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{Pipeline, PipelineError, RunSummary};
pub use publish::{AtomicPublisher, PublishError, PublishState};
pub use record::{FetchWindow, TableRef, TableTriplet, TickerRecord};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: handles passed between stages are Send + Sync.
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<TickerRecord>();
        require_sync::<TickerRecord>();
        require_send::<TableTriplet>();
        require_sync::<TableTriplet>();
        require_send::<store::MemoryTableStore>();
        require_sync::<store::MemoryTableStore>();
        require_send::<store::ParquetTableStore>();
        require_sync::<store::ParquetTableStore>();
        require_send::<PipelineConfig>();
        require_sync::<PipelineConfig>();
    }
}
