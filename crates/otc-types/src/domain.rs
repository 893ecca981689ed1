use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Direction of an order or position leg, as the strategy intends it.
/// Distinct from the external venue side, which the gateway may encode
/// differently for combo orders (see `otc-gateway`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    pub fn opposite(&self) -> Direction {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
        }
    }

    pub fn sign(&self) -> i32 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Limit,
    Market,
}

/// Order status, following the gateway's external state machine
/// (`SUBMITTING -> NOTTRADED -> PARTTRADED* -> ALLTRADED`, or
/// `REJECTED`/`CANCELLED`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Submitting,
    NotTraded,
    PartTraded,
    AllTraded,
    Cancelled,
    Rejected,
}

impl OrderStatus {
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OrderStatus::Submitting | OrderStatus::NotTraded | OrderStatus::PartTraded
        )
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductType {
    Equity,
    Index,
    Option,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub symbol: String,
    pub exchange: String,
    pub product: ProductType,
    pub multiplier: u32,
    pub min_tick: Decimal,
    pub strike: Option<Decimal>,
    pub option_right: Option<crate::symbol::OptionRight>,
    pub expiry: Option<chrono::NaiveDate>,
    pub trading_class: Option<String>,
}

/// A single leg of a combo order or combo position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Leg {
    pub symbol: String,
    pub exchange: String,
    pub direction: Direction,
    pub ratio: u32,
    pub price: Option<Decimal>,
    pub trading_class: Option<String>,
}

/// Named multi-leg combo shapes the Combo Builder understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComboType {
    Straddle,
    Strangle,
    Spread,
    DiagonalSpread,
    RatioSpread,
    Butterfly,
    InverseButterfly,
    IronButterfly,
    IronCondor,
    Condor,
    BoxSpread,
    RiskReversal,
    Custom,
}

impl ComboType {
    pub fn name(&self) -> &'static str {
        match self {
            ComboType::Straddle => "STRADDLE",
            ComboType::Strangle => "STRANGLE",
            ComboType::Spread => "SPREAD",
            ComboType::DiagonalSpread => "DIAGONAL_SPREAD",
            ComboType::RatioSpread => "RATIO_SPREAD",
            ComboType::Butterfly => "BUTTERFLY",
            ComboType::InverseButterfly => "INVERSE_BUTTERFLY",
            ComboType::IronButterfly => "IRON_BUTTERFLY",
            ComboType::IronCondor => "IRON_CONDOR",
            ComboType::Condor => "CONDOR",
            ComboType::BoxSpread => "BOX_SPREAD",
            ComboType::RiskReversal => "RISK_REVERSAL",
            ComboType::Custom => "CUSTOM",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub orderid: String,
    pub symbol: String,
    pub exchange: String,
    pub direction: Direction,
    pub order_type: OrderType,
    pub price: Decimal,
    pub volume: Decimal,
    pub traded: Decimal,
    pub status: OrderStatus,
    pub is_combo: bool,
    pub legs: Option<Vec<Leg>>,
    pub combo_type: Option<ComboType>,
    pub reference: String,
    pub strategy_name: Option<String>,
}

impl Order {
    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    /// dedup key for reconciliation of external order-status callbacks.
    pub fn dedup_key(&self) -> (OrderStatus, Decimal) {
        (self.status, self.traded)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub tradeid: String,
    pub orderid: String,
    pub symbol: String,
    pub direction: Direction,
    pub price: Decimal,
    pub volume: Decimal,
    pub time: DateTime<Utc>,
}

/// Position snapshot as reported by the external gateway on `query_position`,
/// distinct from the Position Engine's own accounted `Position` (which tracks
/// cost basis/realized P&L the gateway doesn't know about).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BrokerPosition {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_cost: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountData {
    pub account_id: String,
    pub balance: Decimal,
    pub frozen: Decimal,
    pub margin: Decimal,
    pub position_profit: Decimal,
}

impl AccountData {
    pub fn available(&self) -> Decimal {
        self.balance - self.frozen
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogData {
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub source: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn order_dedup_key_changes_with_status_or_fill() {
        let mut order = Order {
            orderid: "1".into(),
            symbol: "SPY-USD-STK".into(),
            exchange: "SMART".into(),
            direction: Direction::Long,
            order_type: OrderType::Market,
            price: Decimal::ZERO,
            volume: dec!(10),
            traded: dec!(0),
            status: OrderStatus::NotTraded,
            is_combo: false,
            legs: None,
            combo_type: None,
            reference: "test".into(),
            strategy_name: None,
        };
        let key0 = order.dedup_key();
        order.traded = dec!(5);
        order.status = OrderStatus::PartTraded;
        let key1 = order.dedup_key();
        assert_ne!(key0, key1);
    }

    #[test]
    fn active_status_set_matches_spec() {
        assert!(OrderStatus::Submitting.is_active());
        assert!(OrderStatus::NotTraded.is_active());
        assert!(OrderStatus::PartTraded.is_active());
        assert!(!OrderStatus::AllTraded.is_active());
        assert!(!OrderStatus::Rejected.is_active());
        assert!(!OrderStatus::Cancelled.is_active());
    }
}
