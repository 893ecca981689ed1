//! Strategy Lifecycle Manager: the OMS cache (orders/trades/active-order
//! sets), the live strategy map, the class registry, and the bridge
//! (`StrategyHost`) a strategy uses to read market data and submit orders.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use otc_bus::{Event, EventBus};
use otc_gateway::{GatewayAdapter, OrderRequest};
use otc_options::{ContractStore, LegInput};
use otc_position::{CloseInstruction, CloseKind, PositionEngine};
use otc_types::{
    ChainView, ComboType, CoreResult, Direction, Leg, LogData, LogLevel, Order, OptionQuote, OrderType, Strategy, StrategyEvent,
    StrategyFactory, StrategyHost, StrategyRuntimeError, StrategyStatus, Trade,
};

use crate::calendar::TradingCalendar;
use crate::hedge::HedgingController;
use crate::persistence::PersistenceStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredSetting {
    class_name: String,
    portfolio: String,
    setting: serde_json::Value,
}

struct StrategyState {
    strategy: Mutex<Box<dyn Strategy>>,
    portfolio: String,
    inited: AtomicBool,
    started: AtomicBool,
    error: AtomicBool,
    error_msg: Mutex<String>,
    timer_count: AtomicU32,
    timer_trigger: u32,
}

pub struct StrategyManager {
    bus: Arc<EventBus>,
    store: Arc<ContractStore>,
    positions: Arc<PositionEngine>,
    gateway: Arc<GatewayAdapter>,
    persistence: PersistenceStore,
    calendar: TradingCalendar,
    classes: DashMap<String, Arc<dyn StrategyFactory>>,
    strategies: DashMap<String, Arc<StrategyState>>,
    active_orders: DashMap<String, HashSet<String>>,
    order_to_strategy: DashMap<String, String>,
    hedging: Mutex<Option<Arc<HedgingController>>>,
}

impl StrategyManager {
    pub fn new(
        bus: Arc<EventBus>,
        store: Arc<ContractStore>,
        positions: Arc<PositionEngine>,
        gateway: Arc<GatewayAdapter>,
        persistence: PersistenceStore,
        calendar: TradingCalendar,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            store,
            positions,
            gateway,
            persistence,
            calendar,
            classes: DashMap::new(),
            strategies: DashMap::new(),
            active_orders: DashMap::new(),
            order_to_strategy: DashMap::new(),
            hedging: Mutex::new(None),
        })
    }

    /// Wired once by the runtime context after both are constructed, since
    /// the Hedging Controller itself needs a handle back to this manager.
    pub fn set_hedging_controller(&self, controller: Arc<HedgingController>) {
        *self.hedging.lock() = Some(controller);
    }

    pub fn register_class(&self, factory: Arc<dyn StrategyFactory>) {
        self.classes.insert(factory.class_name().to_string(), factory);
    }

    fn setting_path(&self) -> std::path::PathBuf {
        self.persistence.strategy_setting_path()
    }

    fn data_path(&self) -> std::path::PathBuf {
        self.persistence.strategy_data_path()
    }

    /// Identity is derived, never taken from the caller: `strategy_name =
    /// "{class_name}_{portfolio}"`, so two configs can never desync name from
    /// identity.
    pub fn add_strategy(&self, class_name: &str, portfolio: &str, setting: serde_json::Value) -> CoreResult<String> {
        let strategy_name = format!("{class_name}_{portfolio}");
        let strategy_name = strategy_name.as_str();

        let existing: HashMap<String, StoredSetting> = self.persistence.load_data(&self.setting_path())?;
        if existing.contains_key(strategy_name) {
            self.recover_strategy(strategy_name)?;
            return Ok(strategy_name.to_string());
        }

        if self.strategies.contains_key(strategy_name) {
            return Err(StrategyRuntimeError::AlreadyExists { name: strategy_name.to_string() }.into());
        }
        let factory = self
            .classes
            .get(class_name)
            .ok_or_else(|| StrategyRuntimeError::ClassNotRegistered { class_name: class_name.to_string() })?
            .clone();

        let strategy = factory.create(&setting);
        let timer_trigger = strategy.timer_trigger();

        self.positions.get_create_strategy_holding(strategy_name);
        self.persistence.upsert(
            &self.setting_path(),
            strategy_name,
            &StoredSetting {
                class_name: class_name.to_string(),
                portfolio: portfolio.to_string(),
                setting,
            },
        )?;

        self.strategies.insert(
            strategy_name.to_string(),
            Arc::new(StrategyState {
                strategy: Mutex::new(strategy),
                portfolio: portfolio.to_string(),
                inited: AtomicBool::new(false),
                started: AtomicBool::new(false),
                error: AtomicBool::new(false),
                error_msg: Mutex::new(String::new()),
                timer_count: AtomicU32::new(0),
                timer_trigger,
            }),
        );
        self.active_orders.entry(strategy_name.to_string()).or_default();
        info!(strategy_name, class_name, "strategy added");
        Ok(strategy_name.to_string())
    }

    pub fn init_strategy(&self, strategy_name: &str) -> CoreResult<()> {
        let state = self.require_state(strategy_name)?;
        if state.inited.load(Ordering::SeqCst) {
            return Err(self.lifecycle_error(strategy_name, "init", "already inited"));
        }
        let host = self.host_for(strategy_name);
        state.strategy.lock().on_init_logic(&host);
        state.inited.store(true, Ordering::SeqCst);
        self.bus.put(Event::Strategy(StrategyEvent::Inited { strategy_name: strategy_name.to_string() }));
        Ok(())
    }

    pub fn start_strategy(&self, strategy_name: &str) -> CoreResult<()> {
        let state = self.require_state(strategy_name)?;
        if !state.inited.load(Ordering::SeqCst) {
            return Err(self.lifecycle_error(strategy_name, "start", "not inited"));
        }
        if state.started.load(Ordering::SeqCst) {
            return Err(self.lifecycle_error(strategy_name, "start", "already started"));
        }
        state.started.store(true, Ordering::SeqCst);
        self.bus.put(Event::Strategy(StrategyEvent::Started { strategy_name: strategy_name.to_string() }));
        Ok(())
    }

    pub fn stop_strategy(&self, strategy_name: &str) -> CoreResult<()> {
        let state = self.require_state(strategy_name)?;
        if !state.started.load(Ordering::SeqCst) {
            return Err(self.lifecycle_error(strategy_name, "stop", "not started"));
        }
        let host = self.host_for(strategy_name);
        state.strategy.lock().on_stop_logic(&host);
        state.started.store(false, Ordering::SeqCst);

        for orderid in self.active_orders.get(strategy_name).map(|set| set.clone()).unwrap_or_default() {
            self.gateway.cancel_order(&orderid);
        }
        self.persist_holding(strategy_name)?;
        self.bus.put(Event::Strategy(StrategyEvent::Stopped { strategy_name: strategy_name.to_string() }));
        Ok(())
    }

    pub fn remove_strategy(&self, strategy_name: &str) -> CoreResult<()> {
        let state = self.require_state(strategy_name)?;
        if state.started.load(Ordering::SeqCst) {
            return Err(self.lifecycle_error(strategy_name, "remove", "still started"));
        }
        self.persist_holding(strategy_name)?;
        if let Some((_, ids)) = self.active_orders.remove(strategy_name) {
            for id in ids {
                self.order_to_strategy.remove(&id);
            }
        }
        if let Some(hedging) = self.hedging.lock().clone() {
            hedging.unregister_strategy(strategy_name);
        }
        self.strategies.remove(strategy_name);
        self.positions.remove_strategy_holding(strategy_name);
        Ok(())
    }

    pub fn delete_strategy(&self, strategy_name: &str) -> CoreResult<()> {
        let state = self.require_state(strategy_name)?;
        if state.started.load(Ordering::SeqCst) {
            return Err(self.lifecycle_error(strategy_name, "delete", "still started"));
        }
        self.remove_strategy(strategy_name)?;
        self.persistence.remove(&self.setting_path(), strategy_name)?;
        self.persistence.remove(&self.data_path(), strategy_name)?;
        Ok(())
    }

    pub fn recover_strategy(&self, strategy_name: &str) -> CoreResult<()> {
        let settings: HashMap<String, StoredSetting> = self.persistence.load_data(&self.setting_path())?;
        let stored = settings
            .get(strategy_name)
            .ok_or_else(|| StrategyRuntimeError::NotFound { name: strategy_name.to_string() })?
            .clone();

        let factory = self
            .classes
            .get(&stored.class_name)
            .ok_or_else(|| StrategyRuntimeError::ClassNotRegistered { class_name: stored.class_name.clone() })?
            .clone();
        let strategy = factory.create(&stored.setting);
        let timer_trigger = strategy.timer_trigger();

        self.positions.get_create_strategy_holding(strategy_name);
        let holdings: HashMap<String, otc_position::StrategyHolding> = self.persistence.load_data(&self.data_path())?;
        if let Some(holding) = holdings.get(strategy_name) {
            self.positions.load_serialized_holding(strategy_name, holding.clone());
        }

        self.strategies.insert(
            strategy_name.to_string(),
            Arc::new(StrategyState {
                strategy: Mutex::new(strategy),
                portfolio: stored.portfolio,
                inited: AtomicBool::new(false),
                started: AtomicBool::new(false),
                error: AtomicBool::new(false),
                error_msg: Mutex::new(String::new()),
                timer_count: AtomicU32::new(0),
                timer_trigger,
            }),
        );
        self.active_orders.entry(strategy_name.to_string()).or_default();
        info!(strategy_name, "strategy recovered");
        Ok(())
    }

    pub fn status(&self, strategy_name: &str) -> Option<StrategyStatus> {
        let state = self.strategies.get(strategy_name)?;
        let status = StrategyStatus {
            strategy_name: strategy_name.to_string(),
            inited: state.inited.load(Ordering::SeqCst),
            started: state.started.load(Ordering::SeqCst),
            error: state.error.load(Ordering::SeqCst),
            error_msg: state.error_msg.lock().clone(),
        };
        Some(status)
    }

    #[allow(clippy::too_many_arguments)]
    fn send_order(
        &self,
        strategy_name: &str,
        symbol: &str,
        direction: Direction,
        price: Decimal,
        volume: Decimal,
        order_type: OrderType,
        reference: String,
        is_combo: bool,
        legs: Option<Vec<Leg>>,
        combo_type: Option<ComboType>,
    ) -> Vec<String> {
        let req = OrderRequest {
            client_order_id: String::new(),
            symbol: symbol.to_string(),
            exchange: "SMART".to_string(),
            direction,
            order_type,
            price: price.round_dp(2),
            volume: volume.round_dp(0),
            is_combo,
            legs,
            combo_type,
            reference,
            strategy_name: Some(strategy_name.to_string()),
            trading_class: None,
        };

        match self.gateway.send_order(req) {
            Ok(local_id) => {
                self.active_orders.entry(strategy_name.to_string()).or_default().insert(local_id.clone());
                self.order_to_strategy.insert(local_id.clone(), strategy_name.to_string());
                vec![local_id]
            }
            Err(err) => {
                warn!(strategy_name, %err, "send_order failed");
                vec![]
            }
        }
    }

    fn submit_close_instruction(&self, strategy_name: &str, instr: CloseInstruction) {
        let reference = strategy_name.to_string();
        match instr.kind {
            CloseKind::Underlying | CloseKind::Option => {
                self.send_order(strategy_name, &instr.symbol, instr.direction, Decimal::ZERO, instr.volume, OrderType::Market, reference, false, None, None);
            }
            CloseKind::Combo => {
                let legs: Vec<Leg> = instr
                    .leg_symbols
                    .iter()
                    .map(|symbol| Leg {
                        symbol: symbol.clone(),
                        exchange: "SMART".to_string(),
                        direction: instr.direction,
                        ratio: 1,
                        price: None,
                        trading_class: None,
                    })
                    .collect();
                self.send_order(
                    strategy_name,
                    &instr.symbol,
                    instr.direction,
                    Decimal::ZERO,
                    instr.volume,
                    OrderType::Market,
                    reference,
                    true,
                    Some(legs),
                    instr.combo_type,
                );
            }
        }
    }

    /// Cache order metadata, maintain the active-order set, and forward to
    /// the strategy's `on_order` hook.
    pub fn process_order(&self, order: &Order) {
        self.positions.process_order(order);
        let Some(strategy_name) = order.strategy_name.clone() else { return };

        if !order.is_active() {
            if let Some(mut set) = self.active_orders.get_mut(&strategy_name) {
                set.remove(&order.orderid);
            }
        }
        if let Some(state) = self.strategies.get(&strategy_name) {
            let host = self.host_for(&strategy_name);
            state.strategy.lock().on_order(order, &host);
        }
    }

    /// Route a trade into the Position Engine and the owning strategy's
    /// `on_trade` hook.
    pub fn process_trade(&self, trade: &Trade) {
        let Some(strategy_name) = self.order_to_strategy.get(&trade.orderid).map(|s| s.clone()) else {
            warn!(orderid = %trade.orderid, "trade for unknown order, dropping");
            return;
        };
        self.positions.process_trade(&strategy_name, trade);
        if let Some(state) = self.strategies.get(&strategy_name) {
            let host = self.host_for(&strategy_name);
            state.strategy.lock().on_trade(trade, &host);
        }
    }

    /// Refresh metrics and tick every started strategy's own timer counter,
    /// invoking `on_timer_logic` once it reaches that strategy's trigger.
    pub fn on_timer(&self) {
        for entry in self.strategies.iter() {
            let strategy_name = entry.key().clone();
            let state = entry.value().clone();
            self.positions.update_metrics(&strategy_name, &self.store);

            if !state.started.load(Ordering::SeqCst) {
                continue;
            }
            let count = state.timer_count.fetch_add(1, Ordering::SeqCst) + 1;
            if count < state.timer_trigger {
                continue;
            }
            state.timer_count.store(0, Ordering::SeqCst);

            let host = self.host_for(&strategy_name);
            let mut strategy = state.strategy.lock();
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| strategy.on_timer_logic(&host)));
            if let Err(panic) = result {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                drop(strategy);
                error!(strategy_name, message, "strategy on_timer_logic panicked");
                state.error.store(true, Ordering::SeqCst);
                *state.error_msg.lock() = message.clone();
                state.started.store(false, Ordering::SeqCst);
                self.bus.put(Event::Strategy(StrategyEvent::Error { strategy_name, message }));
            }
        }
    }

    /// True if the strategy has an active order tagged by the Hedging
    /// Controller (`Hedge_{strategy_name}`), i.e. a prior hedge cycle's
    /// order is still working.
    pub(crate) fn has_active_hedge_order(&self, strategy_name: &str) -> bool {
        let Some(set) = self.active_orders.get(strategy_name) else { return false };
        set.iter().any(|id| {
            self.gateway
                .cached_order(id)
                .map(|order| order.is_active() && order.reference.starts_with("Hedge_"))
                .unwrap_or(false)
        })
    }

    pub(crate) fn cancel_hedge_orders(&self, strategy_name: &str) {
        let Some(set) = self.active_orders.get(strategy_name) else { return };
        for id in set.iter() {
            if self.gateway.cached_order(id).map(|o| o.is_active() && o.reference.starts_with("Hedge_")).unwrap_or(false) {
                self.gateway.cancel_order(id);
            }
        }
    }

    pub(crate) fn submit_hedge_order(&self, strategy_name: &str, symbol: &str, direction: Direction, volume: Decimal, reference: String) {
        self.send_order(strategy_name, symbol, direction, Decimal::ZERO, volume, OrderType::Market, reference, false, None, None);
    }

    fn persist_holding(&self, strategy_name: &str) -> CoreResult<()> {
        if let Some(holding) = self.positions.serialize_holding(strategy_name) {
            self.persistence.upsert(&self.data_path(), strategy_name, &holding)?;
        }
        Ok(())
    }

    fn require_state(&self, strategy_name: &str) -> Result<Arc<StrategyState>, StrategyRuntimeError> {
        self.strategies
            .get(strategy_name)
            .map(|s| s.clone())
            .ok_or_else(|| StrategyRuntimeError::NotFound { name: strategy_name.to_string() })
    }

    fn lifecycle_error(&self, strategy_name: &str, action: &str, state: &str) -> otc_types::CoreError {
        StrategyRuntimeError::InvalidLifecycleTransition {
            name: strategy_name.to_string(),
            action: action.to_string(),
            state: state.to_string(),
        }
        .into()
    }

    fn host_for(&self, strategy_name: &str) -> ManagerHost<'_> {
        ManagerHost {
            manager: self,
            strategy_name: strategy_name.to_string(),
        }
    }
}

struct ManagerHost<'a> {
    manager: &'a StrategyManager,
    strategy_name: String,
}

impl StrategyHost for ManagerHost<'_> {
    fn underlying_symbol(&self) -> Option<String> {
        let state = self.manager.strategies.get(&self.strategy_name)?;
        let portfolio = self.manager.store.get_portfolio(&state.portfolio)?;
        portfolio.underlying.map(|u| u.symbol)
    }

    fn get_option(&self, symbol: &str) -> Option<OptionQuote> {
        let snapshot = self.manager.store.get_option(symbol)?;
        Some(OptionQuote {
            symbol: snapshot.symbol,
            strike: snapshot.strike,
            right: snapshot.right,
            expiry: snapshot.expiry,
            mid_price: snapshot.mid_price,
            delta: snapshot.delta,
            gamma: snapshot.gamma,
            theta: snapshot.theta,
            vega: snapshot.vega,
            mid_iv: snapshot.mid_iv,
        })
    }

    fn get_chain(&self, chain_symbol: &str) -> Option<ChainView> {
        let root = chain_symbol.split('_').next()?;
        let portfolio = self.manager.store.get_portfolio(root)?;
        let chain = portfolio.chains.get(chain_symbol)?;
        let expiry = chain_symbol
            .rsplit('_')
            .next()
            .and_then(|raw| chrono::NaiveDate::parse_from_str(raw, "%Y%m%d").ok());
        Some(ChainView {
            chain_symbol: chain.chain_symbol.clone(),
            days_to_expiry: self.manager.calendar.days_to_expiry(expiry),
            atm_strike: chain.atm_strike,
        })
    }

    fn underlying_order(&self, direction: Direction, price: Decimal, volume: Decimal, order_type: OrderType, reference: Option<String>) -> Vec<String> {
        let Some(symbol) = self.underlying_symbol() else {
            warn!(strategy_name = %self.strategy_name, "underlying_order called with no underlying");
            return vec![];
        };
        self.manager.send_order(
            &self.strategy_name,
            &symbol,
            direction,
            price,
            volume,
            order_type,
            reference.unwrap_or_else(|| self.strategy_name.clone()),
            false,
            None,
            None,
        )
    }

    fn option_order(&self, symbol: &str, direction: Direction, price: Decimal, volume: Decimal, order_type: OrderType, reference: Option<String>) -> Vec<String> {
        self.manager.send_order(
            &self.strategy_name,
            symbol,
            direction,
            price,
            volume,
            order_type,
            reference.unwrap_or_else(|| self.strategy_name.clone()),
            false,
            None,
            None,
        )
    }

    fn combo_order(
        &self,
        combo_type: ComboType,
        option_symbols: &[(&str, &str)],
        direction: Direction,
        price: Decimal,
        volume: Decimal,
        order_type: OrderType,
        reference: Option<String>,
    ) -> Vec<String> {
        let legs_input: HashMap<String, LegInput> = option_symbols
            .iter()
            .map(|(key, symbol)| {
                (
                    key.to_string(),
                    LegInput {
                        symbol: symbol.to_string(),
                        exchange: "SMART".to_string(),
                        trading_class: None,
                    },
                )
            })
            .collect();

        let (legs, signature) = match otc_options::build(combo_type, &legs_input, direction, None) {
            Ok(result) => result,
            Err(err) => {
                warn!(strategy_name = %self.strategy_name, %err, "combo build failed");
                return vec![];
            }
        };

        let root = otc_types::symbol::parse_option_symbol(&legs[0].symbol)
            .map(|parsed| parsed.root)
            .unwrap_or_else(|_| "UNKNOWN".to_string());
        let combo_symbol = format!("{root}_{}_{signature}", combo_type.name());

        self.manager.send_order(
            &self.strategy_name,
            &combo_symbol,
            direction,
            price,
            volume,
            order_type,
            reference.unwrap_or_else(|| self.strategy_name.clone()),
            true,
            Some(legs),
            Some(combo_type),
        )
    }

    fn close_all_strategy_positions(&self) {
        for instr in self.manager.positions.close_all_strategy_positions(&self.strategy_name) {
            self.manager.submit_close_instruction(&self.strategy_name, instr);
        }
    }

    fn register_hedging(&self, timer_trigger: u32, delta_target: Decimal, delta_range: Decimal) {
        if let Some(controller) = self.manager.hedging.lock().clone() {
            controller.register_strategy(&self.strategy_name, timer_trigger, delta_target, delta_range, self.underlying_symbol());
        }
    }

    fn unregister_hedging(&self) {
        if let Some(controller) = self.manager.hedging.lock().clone() {
            controller.unregister_strategy(&self.strategy_name);
        }
    }

    fn write_log(&self, message: &str) {
        info!(strategy_name = %self.strategy_name, message);
        self.manager.bus.put(Event::Log(LogData {
            time: Utc::now(),
            level: LogLevel::Info,
            source: self.strategy_name.clone(),
            message: message.to_string(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use otc_gateway::PaperBroker;
    use otc_position::{Position, StrategyHolding};
    use otc_types::{Contract, ProductType};
    use rust_decimal_macros::dec;

    struct NullStrategy;
    impl Strategy for NullStrategy {
        fn author(&self) -> &str {
            "test"
        }
        fn parameters(&self) -> &[String] {
            &[]
        }
        fn on_init_logic(&mut self, _host: &dyn StrategyHost) {}
        fn on_stop_logic(&mut self, _host: &dyn StrategyHost) {}
        fn on_timer_logic(&mut self, _host: &dyn StrategyHost) {}
    }

    struct NullFactory;
    impl StrategyFactory for NullFactory {
        fn class_name(&self) -> &'static str {
            "null"
        }
        fn create(&self, _setting: &serde_json::Value) -> Box<dyn Strategy> {
            Box::new(NullStrategy)
        }
    }

    fn harness() -> (Arc<StrategyManager>, tempfile::TempDir) {
        let bus = Arc::new(EventBus::new());
        let store = Arc::new(ContractStore::new());
        store.ingest_contract(Contract {
            symbol: "SPY-USD-STK".to_string(),
            exchange: "SMART".to_string(),
            product: ProductType::Equity,
            multiplier: 1,
            min_tick: dec!(0.01),
            strike: None,
            option_right: None,
            expiry: None,
            trading_class: None,
        });

        let positions = Arc::new(PositionEngine::new());
        let gateway = GatewayAdapter::new(Box::new(PaperBroker::new()), bus.clone());
        gateway.connect("127.0.0.1", 0, 0, "TEST").unwrap();

        let dir = tempfile::tempdir().unwrap();
        let persistence = PersistenceStore::new(dir.path());
        let calendar = TradingCalendar::default();

        let manager = StrategyManager::new(bus, store, positions, gateway, persistence, calendar);
        manager.register_class(Arc::new(NullFactory));
        (manager, dir)
    }

    #[test]
    fn add_strategy_derives_name_from_class_and_portfolio() {
        let (manager, _dir) = harness();
        let strategy_name = manager.add_strategy("null", "SPY", serde_json::json!({})).unwrap();
        assert_eq!(strategy_name, "null_SPY");
        assert!(manager.status(&strategy_name).is_some());
    }

    #[test]
    fn lifecycle_transitions_reject_out_of_order_calls() {
        let (manager, _dir) = harness();
        let strategy_name = manager.add_strategy("null", "SPY", serde_json::json!({})).unwrap();

        assert!(manager.start_strategy(&strategy_name).is_err());
        manager.init_strategy(&strategy_name).unwrap();
        assert!(manager.init_strategy(&strategy_name).is_err());
        manager.start_strategy(&strategy_name).unwrap();
        assert!(manager.remove_strategy(&strategy_name).is_err());
        manager.stop_strategy(&strategy_name).unwrap();
        manager.remove_strategy(&strategy_name).unwrap();
    }

    #[test]
    fn recover_strategy_restores_persisted_holding() {
        let (manager, _dir) = harness();
        let strategy_name = manager.add_strategy("null", "SPY", serde_json::json!({})).unwrap();
        manager.init_strategy(&strategy_name).unwrap();
        manager.start_strategy(&strategy_name).unwrap();

        let mut combo = otc_position::ComboPosition::new("SPY_STRADDLE_sig", ComboType::Straddle);
        combo.get_or_create_leg("SPY-20251024-C-450-100-USD-OPT").quantity = dec!(2);
        let mut holding = StrategyHolding::new();
        holding.combos.insert(combo.symbol.clone(), combo);
        manager.positions.load_serialized_holding(&strategy_name, holding);

        manager.stop_strategy(&strategy_name).unwrap();
        manager.remove_strategy(&strategy_name).unwrap();

        let strategy_name = manager.add_strategy("null", "SPY", serde_json::json!({})).unwrap();
        let restored = manager.positions.holding(&strategy_name).unwrap();
        let combo = restored.combos.get("SPY_STRADDLE_sig").unwrap();
        assert_eq!(combo.legs[0].quantity, dec!(2));
    }

    #[test]
    fn hedge_cycle_emits_close_then_open_orders() {
        let (manager, _dir) = harness();
        let strategy_name = manager.add_strategy("null", "SPY", serde_json::json!({})).unwrap();
        manager.init_strategy(&strategy_name).unwrap();
        manager.start_strategy(&strategy_name).unwrap();

        let mut holding = StrategyHolding::new();
        let mut underlying = Position::new("SPY-USD-STK", 1);
        underlying.quantity = dec!(3);
        holding.underlying = Some(underlying);
        holding.summary.delta = dec!(12);
        manager.positions.load_serialized_holding(&strategy_name, holding);

        let hedging = HedgingController::new(manager.positions.clone(), manager.store.clone(), 1);
        hedging.set_strategy_manager(manager.clone());
        manager.set_hedging_controller(hedging.clone());
        hedging.register_strategy(&strategy_name, 1, dec!(0), dec!(0), Some("SPY-USD-STK".to_string()));

        hedging.on_timer();

        let active = manager.active_orders.get(&strategy_name).unwrap();
        assert_eq!(active.len(), 2);
        let mut volumes: Vec<Decimal> = active.iter().map(|id| manager.gateway.cached_order(id).unwrap().volume).collect();
        volumes.sort();
        assert_eq!(volumes, vec![dec!(3), dec!(9)]);
        for id in active.iter() {
            let order = manager.gateway.cached_order(id).unwrap();
            assert_eq!(order.direction, Direction::Short);
            assert!(order.reference.starts_with("Hedge_"));
        }
    }

    #[test]
    fn delta_within_band_produces_no_hedge_orders() {
        let (manager, _dir) = harness();
        let strategy_name = manager.add_strategy("null", "SPY", serde_json::json!({})).unwrap();
        manager.init_strategy(&strategy_name).unwrap();
        manager.start_strategy(&strategy_name).unwrap();

        let mut holding = StrategyHolding::new();
        holding.summary.delta = dec!(3.2);
        manager.positions.load_serialized_holding(&strategy_name, holding);

        let hedging = HedgingController::new(manager.positions.clone(), manager.store.clone(), 1);
        hedging.set_strategy_manager(manager.clone());
        manager.set_hedging_controller(hedging.clone());
        hedging.register_strategy(&strategy_name, 1, dec!(0), dec!(5), Some("SPY-USD-STK".to_string()));

        hedging.on_timer();

        assert!(manager.active_orders.get(&strategy_name).unwrap().is_empty());
    }
}
