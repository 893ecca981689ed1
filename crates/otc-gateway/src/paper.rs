//! In-process simulated broker. Fills every order instantly at its
//! submitted price so adapter reconciliation and strategy tests can run
//! without a live venue connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use rust_decimal::Decimal;
use rust_decimal::prelude::Signed;

use otc_types::{AccountData, BrokerPosition, GatewayError, OrderStatus};

use crate::broker::{Broker, BrokerResult, CancelRequest, ConnectionStatus, ExternalEvent, OrderRequest};

struct SimPosition {
    quantity: Decimal,
    average_cost: Decimal,
}

pub struct PaperBroker {
    connected: bool,
    next_trade_id: AtomicU64,
    positions: HashMap<String, SimPosition>,
    sender: Sender<ExternalEvent>,
    receiver: Receiver<ExternalEvent>,
}

impl PaperBroker {
    pub fn new() -> Self {
        let (sender, receiver) = unbounded();
        Self {
            connected: false,
            next_trade_id: AtomicU64::new(0),
            positions: HashMap::new(),
            sender,
            receiver,
        }
    }

    fn apply_fill(&mut self, symbol: &str, direction: otc_types::Direction, volume: Decimal, price: Decimal) {
        let signed = match direction {
            otc_types::Direction::Long => volume,
            otc_types::Direction::Short => -volume,
        };
        let pos = self.positions.entry(symbol.to_string()).or_insert(SimPosition {
            quantity: Decimal::ZERO,
            average_cost: Decimal::ZERO,
        });
        let same_side = pos.quantity == Decimal::ZERO || pos.quantity.signum() == signed.signum();
        if same_side {
            let total_cost = pos.quantity * pos.average_cost + signed * price;
            pos.quantity += signed;
            if pos.quantity != Decimal::ZERO {
                pos.average_cost = (total_cost / pos.quantity).round_dp(2);
            }
        } else {
            pos.quantity += signed;
            if pos.quantity == Decimal::ZERO {
                pos.average_cost = Decimal::ZERO;
            }
        }
    }
}

impl Default for PaperBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Broker for PaperBroker {
    async fn connect(&mut self, _host: &str, _port: u16, _client_id: i32, _account: &str) -> BrokerResult<()> {
        self.connected = true;
        Ok(())
    }

    async fn disconnect(&mut self) -> BrokerResult<()> {
        self.connected = false;
        Ok(())
    }

    fn connection_status(&self) -> ConnectionStatus {
        if self.connected {
            ConnectionStatus::Connected
        } else {
            ConnectionStatus::Disconnected
        }
    }

    async fn send_order(&mut self, req: OrderRequest) -> BrokerResult<String> {
        if !self.connected {
            return Err(GatewayError::Disconnected);
        }

        let tradeid = format!("PAPER-{}", self.next_trade_id.fetch_add(1, Ordering::SeqCst));
        self.apply_fill(&req.symbol, req.direction, req.volume, req.price);

        let _ = self.sender.send(ExternalEvent::OrderStatus {
            orderid: req.client_order_id.clone(),
            status: OrderStatus::AllTraded,
            filled: req.volume,
        });
        let _ = self.sender.send(ExternalEvent::Trade {
            orderid: req.client_order_id.clone(),
            tradeid,
            symbol: req.symbol.clone(),
            direction: req.direction,
            price: req.price,
            volume: req.volume,
            time: Utc::now(),
        });

        Ok(req.client_order_id)
    }

    async fn cancel_order(&mut self, req: CancelRequest) -> BrokerResult<()> {
        if !self.connected {
            return Err(GatewayError::Disconnected);
        }
        // Every order fills synchronously in `send_order`, so there is
        // never anything left to cancel by the time this is called.
        let _ = self.sender.send(ExternalEvent::OrderStatus {
            orderid: req.orderid,
            status: OrderStatus::Cancelled,
            filled: Decimal::ZERO,
        });
        Ok(())
    }

    async fn query_account(&self) -> BrokerResult<AccountData> {
        Ok(AccountData {
            account_id: "PAPER".to_string(),
            balance: Decimal::ZERO,
            frozen: Decimal::ZERO,
            margin: Decimal::ZERO,
            position_profit: Decimal::ZERO,
        })
    }

    async fn query_position(&self) -> BrokerResult<Vec<BrokerPosition>> {
        Ok(self
            .positions
            .iter()
            .filter(|(_, p)| p.quantity != Decimal::ZERO)
            .map(|(symbol, p)| BrokerPosition {
                symbol: symbol.clone(),
                quantity: p.quantity,
                average_cost: p.average_cost,
            })
            .collect())
    }

    fn events(&self) -> Receiver<ExternalEvent> {
        self.receiver.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otc_types::{Direction, OrderType};
    use rust_decimal_macros::dec;

    fn req(symbol: &str, direction: Direction, price: Decimal, volume: Decimal) -> OrderRequest {
        OrderRequest {
            client_order_id: "1".to_string(),
            symbol: symbol.to_string(),
            exchange: "SMART".to_string(),
            direction,
            order_type: OrderType::Market,
            price,
            volume,
            is_combo: false,
            legs: None,
            combo_type: None,
            reference: "test".to_string(),
            strategy_name: None,
            trading_class: None,
        }
    }

    #[tokio::test]
    async fn send_order_requires_connection() {
        let mut broker = PaperBroker::new();
        let result = broker.send_order(req("AAPL-USD-STK", Direction::Long, dec!(100), dec!(1))).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn filled_order_emits_status_then_trade() {
        let mut broker = PaperBroker::new();
        broker.connect("h", 1, 1, "acct").await.unwrap();
        let events = broker.events();

        broker.send_order(req("AAPL-USD-STK", Direction::Long, dec!(100), dec!(1))).await.unwrap();

        let first = events.recv_timeout(std::time::Duration::from_millis(100)).unwrap();
        assert!(matches!(first, ExternalEvent::OrderStatus { status: OrderStatus::AllTraded, .. }));
        let second = events.recv_timeout(std::time::Duration::from_millis(100)).unwrap();
        assert!(matches!(second, ExternalEvent::Trade { .. }));
    }

    #[tokio::test]
    async fn opposing_fills_net_the_position() {
        let mut broker = PaperBroker::new();
        broker.connect("h", 1, 1, "acct").await.unwrap();

        broker.send_order(req("AAPL-USD-STK", Direction::Long, dec!(100), dec!(5))).await.unwrap();
        broker.send_order(req("AAPL-USD-STK", Direction::Short, dec!(110), dec!(3))).await.unwrap();

        let positions = broker.query_position().await.unwrap();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].quantity, dec!(2));
        assert_eq!(positions[0].average_cost, dec!(100.00));
    }
}
