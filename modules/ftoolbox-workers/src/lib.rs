//! Background ingestion workers and the scheduler that drives them.

pub mod creator_updater;
pub mod rank_calculator;
pub mod scheduler;
pub mod statistics_calculator;
pub mod tag_cleanup;
pub mod tag_discovery;
pub mod tag_updater;

pub use creator_updater::CreatorUpdater;
pub use rank_calculator::RankCalculator;
pub use scheduler::{Worker, WorkerManager};
pub use statistics_calculator::StatisticsCalculator;
pub use tag_cleanup::TagCleanup;
pub use tag_discovery::TagDiscovery;
pub use tag_updater::TagUpdater;
