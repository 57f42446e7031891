//! Persistent store for the tag/creator analytics service: row types,
//! queries, and the derived-column recalculations (rank, heat, rollups).

pub mod cleanup;
pub mod creators;
pub mod heat;
pub mod migrate;
pub mod models;
pub mod ranks;
pub mod rate_limits;
pub mod relations;
pub mod statistics;
pub mod tags;
pub mod workers;

pub use migrate::migrate;
pub use models::{
    Creator, CreatorHistory, CreatorStatistics, Tag, TagHistory, TagStatistics, WorkerRow,
};
pub use rate_limits::RateLimitPersistence;
