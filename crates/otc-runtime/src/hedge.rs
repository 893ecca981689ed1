//! Hedging Controller: per-registered-strategy delta hedging driven by the
//! Event Bus TIMER. Evaluates each strategy's current delta against a target
//! band and, when outside it, submits market orders through the strategy's
//! own order path so the fill flows back through the normal OMS bookkeeping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::{info, warn};

use otc_options::ContractStore;
use otc_position::PositionEngine;
use otc_types::Direction;

use crate::strategy_manager::StrategyManager;

/// Orders the controller itself submits are tagged with this prefix so a
/// later cycle recognizes them as still in flight and waits instead of
/// piling on more orders.
const HEDGE_REFERENCE_PREFIX: &str = "Hedge_";

#[derive(Debug, Clone)]
struct HedgeRegistration {
    timer_trigger: u32,
    delta_target: Decimal,
    delta_range: Decimal,
    underlying_symbol: String,
}

pub struct HedgingController {
    positions: Arc<PositionEngine>,
    store: Arc<ContractStore>,
    manager: Mutex<Option<Arc<StrategyManager>>>,
    registered: Mutex<HashMap<String, HedgeRegistration>>,
    timer_count: AtomicU32,
    timer_trigger: u32,
}

impl HedgingController {
    pub fn new(positions: Arc<PositionEngine>, store: Arc<ContractStore>, timer_trigger: u32) -> Arc<Self> {
        Arc::new(Self {
            positions,
            store,
            manager: Mutex::new(None),
            registered: Mutex::new(HashMap::new()),
            timer_count: AtomicU32::new(0),
            timer_trigger,
        })
    }

    /// Wired once by the runtime context, after the `StrategyManager` that
    /// owns order submission has been constructed.
    pub fn set_strategy_manager(&self, manager: Arc<StrategyManager>) {
        *self.manager.lock() = Some(manager);
    }

    pub fn register_strategy(&self, strategy_name: &str, timer_trigger: u32, delta_target: Decimal, delta_range: Decimal, underlying_symbol: Option<String>) {
        let Some(underlying_symbol) = underlying_symbol else {
            warn!(strategy_name, "hedging registration rejected: no underlying symbol");
            return;
        };
        self.registered.lock().insert(
            strategy_name.to_string(),
            HedgeRegistration {
                timer_trigger,
                delta_target,
                delta_range,
                underlying_symbol,
            },
        );
        info!(strategy_name, "strategy registered for hedging");
    }

    pub fn unregister_strategy(&self, strategy_name: &str) {
        self.registered.lock().remove(strategy_name);
    }

    /// Drive one TIMER tick. No-ops unless the controller's own counter has
    /// reached `timer_trigger`.
    pub fn on_timer(&self) {
        let count = self.timer_count.fetch_add(1, Ordering::SeqCst) + 1;
        if count < self.timer_trigger {
            return;
        }
        self.timer_count.store(0, Ordering::SeqCst);

        let Some(manager) = self.manager.lock().clone() else { return };
        let registrations: Vec<(String, HedgeRegistration)> = self.registered.lock().iter().map(|(k, v)| (k.clone(), v.clone())).collect();

        for (strategy_name, registration) in registrations {
            self.evaluate(&manager, &strategy_name, &registration);
        }
    }

    fn evaluate(&self, manager: &Arc<StrategyManager>, strategy_name: &str, registration: &HedgeRegistration) {
        if manager.has_active_hedge_order(strategy_name) {
            manager.cancel_hedge_orders(strategy_name);
            return;
        }

        let Some(holding) = self.positions.holding(strategy_name) else { return };
        let delta = holding.summary.delta;
        let lower = registration.delta_target - registration.delta_range;
        let upper = registration.delta_target + registration.delta_range;
        if delta >= lower && delta <= upper {
            return;
        }

        let root = otc_types::parse_underlying_symbol(&registration.underlying_symbol)
            .map(|parsed| parsed.root)
            .unwrap_or_else(|_| registration.underlying_symbol.clone());
        let Some(theo_delta) = self.store.get_portfolio(&root).and_then(|p| p.underlying).map(|u| u.theo_delta) else {
            warn!(strategy_name, "cannot hedge: no underlying quote in the contract store");
            return;
        };
        if theo_delta.is_zero() {
            warn!(strategy_name, "cannot hedge: underlying theo_delta is zero");
            return;
        }

        let hedge_volume = (registration.delta_target - delta) / theo_delta;
        if hedge_volume.abs() < Decimal::ONE {
            return;
        }

        let underlying_quantity = holding.underlying.as_ref().map(|u| u.quantity).unwrap_or(Decimal::ZERO);
        let (direction, available_to_close) = if hedge_volume.is_sign_positive() {
            (Direction::Long, underlying_quantity.min(Decimal::ZERO).abs())
        } else {
            (Direction::Short, underlying_quantity.max(Decimal::ZERO))
        };

        let reference = format!("{HEDGE_REFERENCE_PREFIX}{strategy_name}");
        let magnitude = hedge_volume.abs();
        let close_volume = available_to_close.min(magnitude);
        let open_volume = magnitude - close_volume;

        if close_volume > Decimal::ZERO {
            manager.submit_hedge_order(strategy_name, &registration.underlying_symbol, direction, close_volume, reference.clone());
        }
        if open_volume > Decimal::ZERO {
            manager.submit_hedge_order(strategy_name, &registration.underlying_symbol, direction, open_volume, reference);
        }
    }
}
