//! Gateway Adapter: local order-id allocation, the per-order state machine,
//! and reconciliation of a `Broker`'s asynchronous callbacks into bus
//! events. The only place in this workspace that drives an async trait —
//! everything else in the core runs on plain threads and channels.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{debug, error, warn};

use otc_bus::{Event, EventBus, EventKind, HandlerId};
use otc_types::{GatewayError, LogData, LogLevel, Order, OrderStatus, Trade};

use crate::broker::{Broker, CancelRequest, ConnectionStatus, ExternalEvent, OrderRequest};

const HARMLESS_VENDOR_CODES: [i32; 4] = [202, 2104, 2106, 2158];
const HEARTBEAT_TICKS: u32 = 10;

#[derive(Debug, Clone)]
struct ConnectParams {
    host: String,
    port: u16,
    client_id: i32,
    account: String,
}

pub struct GatewayAdapter {
    broker: Mutex<Box<dyn Broker>>,
    bus: Arc<EventBus>,
    rt: tokio::runtime::Runtime,
    orders: DashMap<String, Order>,
    last_status: DashMap<String, (OrderStatus, Decimal)>,
    next_local_id: AtomicU64,
    running: Arc<AtomicBool>,
    reader: Mutex<Option<JoinHandle<()>>>,
    heartbeat_ticks: AtomicU32,
    connect_params: Mutex<Option<ConnectParams>>,
    timer_handler: Mutex<Option<HandlerId>>,
}

impl GatewayAdapter {
    pub fn new(broker: Box<dyn Broker>, bus: Arc<EventBus>) -> Arc<Self> {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build gateway adapter runtime");
        Arc::new(Self {
            broker: Mutex::new(broker),
            bus,
            rt,
            orders: DashMap::new(),
            last_status: DashMap::new(),
            next_local_id: AtomicU64::new(1),
            running: Arc::new(AtomicBool::new(false)),
            reader: Mutex::new(None),
            heartbeat_ticks: AtomicU32::new(0),
            connect_params: Mutex::new(None),
            timer_handler: Mutex::new(None),
        })
    }

    /// Establish the external session, start the reader thread and the
    /// heartbeat subscription. Idempotent once connected.
    pub fn connect(self: &Arc<Self>, host: &str, port: u16, client_id: i32, account: &str) -> Result<(), GatewayError> {
        if self.broker.lock().connection_status() == ConnectionStatus::Connected {
            return Ok(());
        }

        let result = self.rt.block_on(self.broker.lock().connect(host, port, client_id, account));
        result.map_err(|_| GatewayError::Disconnected)?;

        *self.connect_params.lock() = Some(ConnectParams {
            host: host.to_string(),
            port,
            client_id,
            account: account.to_string(),
        });

        if !self.running.swap(true, Ordering::SeqCst) {
            let receiver = self.broker.lock().events();
            let adapter = Arc::clone(self);
            let handle = std::thread::spawn(move || adapter.reader_loop(receiver));
            *self.reader.lock() = Some(handle);

            let heartbeat_adapter = Arc::clone(self);
            let id = self.bus.register(EventKind::Timer, move |_event| {
                heartbeat_adapter.on_heartbeat_tick();
            });
            *self.timer_handler.lock() = Some(id);
        }
        Ok(())
    }

    pub fn disconnect(&self) -> Result<(), GatewayError> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(id) = self.timer_handler.lock().take() {
            self.bus.unregister(EventKind::Timer, id);
        }
        if let Some(handle) = self.reader.lock().take() {
            let _ = handle.join();
        }
        self.rt.block_on(self.broker.lock().disconnect()).map_err(|_| GatewayError::Disconnected)
    }

    /// Allocate a local order id, cache the order as `SUBMITTING`, publish it
    /// immediately, then hand the request to the broker. Returns the local
    /// id regardless of whether the external send has completed.
    pub fn send_order(&self, mut req: OrderRequest) -> Result<String, GatewayError> {
        let local_id = self.next_local_id.fetch_add(1, Ordering::SeqCst).to_string();
        req.client_order_id = local_id.clone();

        let order = Order {
            orderid: local_id.clone(),
            symbol: req.symbol.clone(),
            exchange: req.exchange.clone(),
            direction: req.direction,
            order_type: req.order_type,
            price: req.price,
            volume: req.volume,
            traded: Decimal::ZERO,
            status: OrderStatus::Submitting,
            is_combo: req.is_combo,
            legs: req.legs.clone(),
            combo_type: req.combo_type,
            reference: req.reference.clone(),
            strategy_name: req.strategy_name.clone(),
        };

        self.orders.insert(local_id.clone(), order.clone());
        self.last_status.insert(local_id.clone(), order.dedup_key());
        self.bus.put(Event::Order(order.clone()));

        match self.rt.block_on(self.broker.lock().send_order(req)) {
            Ok(_vendor_id) => Ok(local_id),
            Err(err) => {
                if let Some(mut cached) = self.orders.get_mut(&local_id) {
                    cached.status = OrderStatus::Rejected;
                    self.last_status.insert(local_id.clone(), cached.dedup_key());
                    self.bus.put(Event::Order(cached.clone()));
                }
                Err(err)
            }
        }
    }

    /// Fire-and-forget cancellation; success is observed later as an ORDER
    /// event moving to CANCELLED.
    pub fn cancel_order(&self, orderid: &str) {
        let result = self.rt.block_on(self.broker.lock().cancel_order(CancelRequest { orderid: orderid.to_string() }));
        if let Err(err) = result {
            warn!(orderid, %err, "cancel request failed");
        }
    }

    pub fn cached_order(&self, orderid: &str) -> Option<Order> {
        self.orders.get(orderid).map(|o| o.clone())
    }

    fn reader_loop(self: Arc<Self>, receiver: crossbeam_channel::Receiver<ExternalEvent>) {
        while self.running.load(Ordering::SeqCst) {
            match receiver.recv_timeout(Duration::from_millis(200)) {
                Ok(event) => self.handle_external_event(event),
                Err(crossbeam_channel::RecvTimeoutError::Timeout) => continue,
                Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
            }
        }
    }

    fn handle_external_event(&self, event: ExternalEvent) {
        match event {
            ExternalEvent::OrderStatus { orderid, status, filled } => self.reconcile_order_status(orderid, status, filled),
            ExternalEvent::OpenOrder { orderid, symbol, direction, order_type, price, volume } => {
                self.reconcile_open_order(orderid, symbol, direction, order_type, price, volume)
            }
            ExternalEvent::Trade { orderid, tradeid, symbol, direction, price, volume, time } => {
                self.reconcile_trade(orderid, tradeid, symbol, direction, price, volume, time)
            }
            ExternalEvent::Position(position) => self.bus.put(Event::Position(position)),
            ExternalEvent::Account(account) => self.bus.put(Event::Account(account)),
            ExternalEvent::Error { code, message } => self.reconcile_error(code, message),
        }
    }

    fn reconcile_order_status(&self, orderid: String, status: OrderStatus, filled: Decimal) {
        let key = (status, filled);
        if self.last_status.get(&orderid).map(|v| *v) == Some(key) {
            return;
        }
        self.last_status.insert(orderid.clone(), key);

        let Some(mut order) = self.orders.get_mut(&orderid) else {
            warn!(orderid, "order status for unknown order, dropping");
            return;
        };
        order.status = status;
        order.traded = filled;
        self.bus.put(Event::Order(order.clone()));
    }

    fn reconcile_open_order(
        &self,
        orderid: String,
        symbol: String,
        direction: otc_types::Direction,
        order_type: otc_types::OrderType,
        price: Decimal,
        volume: Decimal,
    ) {
        if self.orders.contains_key(&orderid) {
            return;
        }
        let order = Order {
            orderid: orderid.clone(),
            symbol,
            exchange: "SMART".to_string(),
            direction,
            order_type,
            price,
            volume,
            traded: Decimal::ZERO,
            status: OrderStatus::Submitting,
            is_combo: false,
            legs: None,
            combo_type: None,
            reference: String::new(),
            strategy_name: None,
        };
        self.orders.insert(orderid.clone(), order.clone());
        self.last_status.insert(orderid, order.dedup_key());
        self.bus.put(Event::Order(order));
    }

    /// A combo's external fills always report the BUY side; the intent
    /// direction recorded at submission overrides it.
    fn reconcile_trade(
        &self,
        orderid: String,
        tradeid: String,
        symbol: String,
        mut direction: otc_types::Direction,
        price: Decimal,
        volume: Decimal,
        time: chrono::DateTime<chrono::Utc>,
    ) {
        if let Some(order) = self.orders.get(&orderid) {
            if order.is_combo {
                direction = order.direction;
            }
        }
        self.bus.put(Event::Trade(Trade {
            tradeid,
            orderid,
            symbol,
            direction,
            price,
            volume,
            time,
        }));
    }

    fn reconcile_error(&self, code: i32, message: String) {
        if HARMLESS_VENDOR_CODES.contains(&code) {
            debug!(code, message, "harmless vendor status, suppressed");
            return;
        }
        error!(code, message, "gateway error");
        self.bus.put(Event::Log(LogData {
            time: chrono::Utc::now(),
            level: LogLevel::Error,
            source: "GatewayAdapter".to_string(),
            message: format!("[{code}] {message}"),
        }));
    }

    fn on_heartbeat_tick(&self) {
        let count = self.heartbeat_ticks.fetch_add(1, Ordering::SeqCst) + 1;
        if count < HEARTBEAT_TICKS {
            return;
        }
        self.heartbeat_ticks.store(0, Ordering::SeqCst);

        if self.broker.lock().connection_status() == ConnectionStatus::Connected {
            return;
        }
        let Some(params) = self.connect_params.lock().clone() else {
            return;
        };
        warn!("gateway disconnected, attempting reconnect");
        let result = self.rt.block_on(self.broker.lock().connect(&params.host, params.port, params.client_id, &params.account));
        if let Err(err) = result {
            error!(%err, "reconnect attempt failed");
        }
    }
}
