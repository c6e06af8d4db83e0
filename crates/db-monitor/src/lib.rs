pub mod monitor;
pub mod normalize;
pub mod pool;
pub mod slow_query;

pub use monitor::{PerformanceSummary, QueryMetric, QueryMonitor, QueryTimer};
pub use normalize::{extract_operation, extract_table_names, normalize_query, query_hash};
pub use pool::{AdjustmentOutcome, PoolConfig, PoolHealth, PoolManager, PoolSnapshot};
pub use slow_query::{
    SlowQueryEvent, SlowQueryFilter, SlowQueryQueue, SlowQueryStore, SlowQueryWriter,
};
