//! The strategy class contract: what a user strategy implements, and the
//! narrow interface it is given back into the runtime. Kept in `otc-types`
//! (rather than `otc-runtime`) so strategy authors only depend on this
//! crate, never on the concrete position/gateway machinery.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{ComboType, Direction, Order, OrderType, Trade};

/// Flat, read-only view of a live option quote, handed to strategies by the
/// host without exposing the Contract/Portfolio Store's internal types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionQuote {
    pub symbol: String,
    pub strike: Decimal,
    pub right: crate::symbol::OptionRight,
    pub expiry: chrono::NaiveDate,
    pub mid_price: Decimal,
    pub delta: Decimal,
    pub gamma: Decimal,
    pub theta: Decimal,
    pub vega: Decimal,
    pub mid_iv: Decimal,
}

/// Read-only view of a chain's days-to-expiry and ATM strike, mirroring the
/// Contract/Portfolio Store's `ChainSnapshot` without requiring strategies to
/// depend on `otc-options`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainView {
    pub chain_symbol: String,
    pub days_to_expiry: i64,
    pub atm_strike: Option<Decimal>,
}

/// Current status of a strategy, exposed for introspection (UI, logging).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyStatus {
    pub strategy_name: String,
    pub inited: bool,
    pub started: bool,
    pub error: bool,
    pub error_msg: String,
}

/// The runtime-provided services a strategy may call back into. Implemented
/// by `otc-runtime`'s strategy manager; kept object-safe so strategies can be
/// stored as `Box<dyn Strategy>` without generic parameters leaking out.
pub trait StrategyHost: Send + Sync {
    fn underlying_symbol(&self) -> Option<String>;
    fn get_option(&self, symbol: &str) -> Option<OptionQuote>;
    fn get_chain(&self, chain_symbol: &str) -> Option<ChainView>;

    fn underlying_order(
        &self,
        direction: Direction,
        price: Decimal,
        volume: Decimal,
        order_type: OrderType,
        reference: Option<String>,
    ) -> Vec<String>;

    fn option_order(
        &self,
        symbol: &str,
        direction: Direction,
        price: Decimal,
        volume: Decimal,
        order_type: OrderType,
        reference: Option<String>,
    ) -> Vec<String>;

    fn combo_order(
        &self,
        combo_type: ComboType,
        option_symbols: &[(&str, &str)],
        direction: Direction,
        price: Decimal,
        volume: Decimal,
        order_type: OrderType,
        reference: Option<String>,
    ) -> Vec<String>;

    fn close_all_strategy_positions(&self);
    fn register_hedging(&self, timer_trigger: u32, delta_target: Decimal, delta_range: Decimal);
    fn unregister_hedging(&self);

    fn write_log(&self, message: &str);
}

/// The three user-authored lifecycle hooks plus the class metadata every
/// strategy must declare.
pub trait Strategy: Send + Sync {
    fn author(&self) -> &str;
    fn parameters(&self) -> &[String];
    fn variables(&self) -> Vec<String> {
        ["inited", "started", "timer_trigger", "error"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    }
    fn timer_trigger(&self) -> u32 {
        10
    }

    fn on_init_logic(&mut self, host: &dyn StrategyHost);
    fn on_stop_logic(&mut self, host: &dyn StrategyHost);
    fn on_timer_logic(&mut self, host: &dyn StrategyHost);

    fn on_order(&mut self, _order: &Order, _host: &dyn StrategyHost) {}
    fn on_trade(&mut self, _trade: &Trade, _host: &dyn StrategyHost) {}
}

/// Bus-visible lifecycle notifications about a strategy, distinct from the
/// `Strategy` trait's own hooks (which run inside the strategy manager, not
/// on the bus).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StrategyEvent {
    Inited { strategy_name: String },
    Started { strategy_name: String },
    Stopped { strategy_name: String },
    Error { strategy_name: String, message: String },
}

/// Factory for a registered strategy class, replacing the distilled core's
/// dynamic folder-walk discovery with an explicit compile-time registry.
pub trait StrategyFactory: Send + Sync {
    fn class_name(&self) -> &'static str;
    fn create(&self, setting: &serde_json::Value) -> Box<dyn Strategy>;
}
