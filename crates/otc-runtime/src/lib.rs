pub mod calendar;
pub mod config;
pub mod context;
pub mod hedge;
pub mod persistence;
pub mod strategy_manager;

pub use calendar::TradingCalendar;
pub use config::{GatewayConfig, HedgeDefaults, RuntimeConfig};
pub use context::RuntimeContext;
pub use hedge::HedgingController;
pub use persistence::PersistenceStore;
pub use strategy_manager::StrategyManager;
