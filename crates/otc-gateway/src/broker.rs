//! The narrow interface a concrete venue connector implements. The Gateway
//! Adapter drives this trait and never talks to a vendor SDK directly, so a
//! new venue is a new `Broker` impl with no change to order-state handling.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use otc_types::{AccountData, BrokerPosition, ComboType, Direction, GatewayError, Leg, OrderStatus, OrderType};

/// A new order, as the Strategy Manager or a strategy's close primitive
/// wants it sent.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    /// The Adapter's local order id, stamped on before the request reaches
    /// the broker. A venue that lets the caller choose the order id (as IB
    /// does) echoes this back on every later callback, which is how the
    /// Adapter matches external events to the order it cached.
    pub client_order_id: String,
    pub symbol: String,
    pub exchange: String,
    pub direction: Direction,
    pub order_type: OrderType,
    pub price: Decimal,
    pub volume: Decimal,
    pub is_combo: bool,
    pub legs: Option<Vec<Leg>>,
    pub combo_type: Option<ComboType>,
    pub reference: String,
    pub strategy_name: Option<String>,
    pub trading_class: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CancelRequest {
    pub orderid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Reconnecting,
}

/// An asynchronous notification pushed by the broker, drained by the
/// adapter's reader loop. Distinct from the bus's own `Event` enum: these
/// are raw, unreconciled, vendor-shaped facts; the adapter turns them into
/// bus events after applying the dedup/state-machine rules.
#[derive(Debug, Clone)]
pub enum ExternalEvent {
    OrderStatus {
        orderid: String,
        status: OrderStatus,
        filled: Decimal,
    },
    OpenOrder {
        orderid: String,
        symbol: String,
        direction: Direction,
        order_type: OrderType,
        price: Decimal,
        volume: Decimal,
    },
    Trade {
        orderid: String,
        tradeid: String,
        symbol: String,
        direction: Direction,
        price: Decimal,
        volume: Decimal,
        time: DateTime<Utc>,
    },
    Position(BrokerPosition),
    Account(AccountData),
    Error {
        code: i32,
        message: String,
    },
}

pub type BrokerResult<T> = Result<T, GatewayError>;

/// Core broker interface. Implementations talk to a real venue's API or
/// simulate execution locally (see [`crate::paper::PaperBroker`]).
#[async_trait]
pub trait Broker: Send + Sync {
    async fn connect(&mut self, host: &str, port: u16, client_id: i32, account: &str) -> BrokerResult<()>;
    async fn disconnect(&mut self) -> BrokerResult<()>;
    fn connection_status(&self) -> ConnectionStatus;

    /// Send an order, returning the broker's own order id (used only for
    /// vendor-side cancellation; the Adapter's local id is authoritative for
    /// everything the core sees).
    async fn send_order(&mut self, req: OrderRequest) -> BrokerResult<String>;
    async fn cancel_order(&mut self, req: CancelRequest) -> BrokerResult<()>;

    async fn query_account(&self) -> BrokerResult<AccountData>;
    async fn query_position(&self) -> BrokerResult<Vec<BrokerPosition>>;

    /// Non-blocking receiver for asynchronous broker notifications. Cloning
    /// the channel is cheap; the adapter owns exactly one reader.
    fn events(&self) -> crossbeam_channel::Receiver<ExternalEvent>;
}
