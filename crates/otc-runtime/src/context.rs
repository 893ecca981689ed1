//! Wires every subsystem together. The distilled core reaches these through
//! module-level globals (one engine instance per process); here they are
//! owned by one `RuntimeContext`, constructed once in the service binary and
//! handed out by `Arc` so ownership and lifetime are explicit instead of
//! implicit in static state.

use std::sync::Arc;
use std::time::Duration;

use otc_bus::{Event, EventBus, EventKind};
use otc_gateway::GatewayAdapter;
use otc_options::ContractStore;
use otc_position::PositionEngine;

use crate::calendar::TradingCalendar;
use crate::config::RuntimeConfig;
use crate::hedge::HedgingController;
use crate::persistence::PersistenceStore;
use crate::strategy_manager::StrategyManager;

pub struct RuntimeContext {
    pub bus: Arc<EventBus>,
    pub store: Arc<ContractStore>,
    pub positions: Arc<PositionEngine>,
    pub gateway: Arc<GatewayAdapter>,
    pub persistence: PersistenceStore,
    pub calendar: TradingCalendar,
    pub strategies: Arc<StrategyManager>,
    pub hedging: Arc<HedgingController>,
}

impl RuntimeContext {
    pub fn new(config: &RuntimeConfig, broker: Box<dyn otc_gateway::Broker>, calendar: TradingCalendar) -> Arc<Self> {
        let bus = Arc::new(EventBus::with_timer_period(Duration::from_secs(config.timer_period_secs)));
        let store = Arc::new(ContractStore::new());
        let positions = Arc::new(PositionEngine::new());
        let gateway = GatewayAdapter::new(broker, bus.clone());
        let persistence = PersistenceStore::new(config.persistence_dir.clone());

        let strategies = StrategyManager::new(bus.clone(), store.clone(), positions.clone(), gateway.clone(), persistence.clone(), calendar.clone());
        let hedging = HedgingController::new(positions.clone(), store.clone(), config.hedge_defaults.timer_trigger);
        strategies.set_hedging_controller(hedging.clone());
        hedging.set_strategy_manager(strategies.clone());

        let context = Arc::new(Self {
            bus,
            store,
            positions,
            gateway,
            persistence,
            calendar,
            strategies,
            hedging,
        });
        context.wire_bus_handlers();
        context
    }

    /// Register the handlers that fan Order/Trade/Timer bus events out into
    /// the Strategy Manager and Hedging Controller. Startup ordering (per
    /// the process lifecycle) calls this once, before `bus.start()`.
    fn wire_bus_handlers(&self) {
        let strategies = self.strategies.clone();
        self.bus.register(EventKind::Order, move |event| {
            if let Event::Order(order) = event {
                strategies.process_order(order);
            }
        });

        let strategies = self.strategies.clone();
        self.bus.register(EventKind::Trade, move |event| {
            if let Event::Trade(trade) = event {
                strategies.process_trade(trade);
            }
        });

        let strategies = self.strategies.clone();
        let hedging = self.hedging.clone();
        self.bus.register(EventKind::Timer, move |_event| {
            strategies.on_timer();
            hedging.on_timer();
        });
    }

    /// Startup: load contracts into the store and publish CONTRACT events,
    /// start the bus, lazily connect the gateway.
    pub fn start(&self, contracts: Vec<otc_types::Contract>, host: &str, port: u16, client_id: i32, account: &str) {
        for contract in contracts {
            self.store.ingest_contract(contract.clone());
            self.bus.put(Event::Contract(contract));
        }
        self.bus.start();
        if let Err(err) = self.gateway.connect(host, port, client_id, account) {
            tracing::warn!(%err, "gateway connect failed at startup, will retry via heartbeat");
        }
    }

    /// Shutdown: stop every live strategy (which itself cancels active
    /// orders and persists its holding), disconnect the gateway, stop the
    /// bus.
    pub fn shutdown(&self, strategy_names: &[String]) {
        for name in strategy_names {
            if let Err(err) = self.strategies.stop_strategy(name) {
                tracing::warn!(strategy_name = %name, %err, "error stopping strategy during shutdown");
            }
        }
        self.gateway.disconnect();
        self.bus.stop();
    }
}
