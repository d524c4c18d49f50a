//! `scope-stats`
//!
//! Bus error statistics derived from the slaves' counter registers.
//!
//! - [`StatisticsCatalog`]: which registers feed which statistic
//! - [`StatisticsEngine`]: consumes new counter samples and publishes
//!   totals and frequencies as ordinary series
//!
//! ```
//! use scope_stats::{StatisticsCatalog, StatisticsConfig, StatisticsEngine};
//! use scope_storage::SeriesRegistry;
//! use std::sync::Arc;
//!
//! let registry = SeriesRegistry::default();
//! let catalog = Arc::new(StatisticsCatalog::new(2));
//! catalog.declare_sources(&registry).unwrap();
//! let mut engine =
//!     StatisticsEngine::new(catalog, &registry, StatisticsConfig::default()).unwrap();
//! assert!(engine.tick().is_idle());
//! ```

pub mod catalog;
pub mod engine;

pub use catalog::{StatisticDefinition, StatisticsCatalog};
pub use engine::{StatisticsConfig, StatisticsEngine, TickReport};
