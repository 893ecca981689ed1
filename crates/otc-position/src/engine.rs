//! Position Engine: owns every strategy's holding, routes trades/orders into
//! it, and exposes the position-closing primitives strategies and the
//! hedging controller compose from. Runs on the event bus dispatcher thread;
//! internal tables are `DashMap` so read-only introspection (UI, logging)
//! never blocks the dispatcher.

use std::collections::HashSet;

use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tracing::warn;

use otc_options::ContractStore;
use otc_types::{ComboType, Direction, Leg, Order, Trade};

use crate::holding::{apply_position_change, ComboPosition, Position, StrategyHolding};

#[derive(Debug, Clone)]
struct OrderMeta {
    is_combo: bool,
    symbol: String,
    combo_type: Option<ComboType>,
    legs: Option<Vec<Leg>>,
}

/// What kind of instrument a close instruction targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    Underlying,
    Option,
    Combo,
}

/// One MARKET order the caller (the strategy manager, via `StrategyHost`)
/// should submit to flatten part of a holding. The Position Engine only
/// computes these; it never talks to the gateway directly.
#[derive(Debug, Clone)]
pub struct CloseInstruction {
    pub kind: CloseKind,
    pub symbol: String,
    pub direction: Direction,
    pub volume: Decimal,
    pub combo_type: Option<ComboType>,
    pub leg_symbols: Vec<String>,
}

pub struct PositionEngine {
    holdings: DashMap<String, StrategyHolding>,
    order_meta: DashMap<String, OrderMeta>,
    trades_seen: Mutex<HashSet<String>>,
}

impl PositionEngine {
    pub fn new() -> Self {
        Self {
            holdings: DashMap::new(),
            order_meta: DashMap::new(),
            trades_seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn get_create_strategy_holding(&self, strategy_name: &str) {
        self.holdings.entry(strategy_name.to_string()).or_default();
    }

    pub fn remove_strategy_holding(&self, strategy_name: &str) {
        self.holdings.remove(strategy_name);
    }

    pub fn holding(&self, strategy_name: &str) -> Option<StrategyHolding> {
        self.holdings.get(strategy_name).map(|h| h.clone())
    }

    /// Record an order's combo metadata so a later trade on it can be routed.
    pub fn process_order(&self, order: &Order) {
        self.order_meta.insert(
            order.orderid.clone(),
            OrderMeta {
                is_combo: order.is_combo,
                symbol: order.symbol.clone(),
                combo_type: order.combo_type,
                legs: order.legs.clone(),
            },
        );
    }

    /// Route a trade into the right position, deduplicating by tradeid.
    pub fn process_trade(&self, strategy_name: &str, trade: &Trade) {
        {
            let mut seen = self.trades_seen.lock();
            if !seen.insert(trade.tradeid.clone()) {
                return;
            }
        }

        let Some(mut holding) = self.holdings.get_mut(strategy_name) else {
            warn!(strategy_name, "trade for unknown strategy holding, dropping");
            return;
        };

        let meta = self.order_meta.get(&trade.orderid).map(|m| m.clone());

        if let Some(meta) = meta.filter(|m| m.is_combo) {
            let combo_symbol = meta.symbol.clone();
            let combo_type = meta.combo_type.unwrap_or(ComboType::Custom);
            let combo = get_or_create_combo_position(&mut holding, &combo_symbol, combo_type, meta.legs.as_deref());

            if trade.symbol == combo.symbol {
                let combo_symbol = combo.symbol.clone();
                let leg = combo.get_or_create_leg(&combo_symbol);
                apply_position_change(leg, trade);
            } else {
                let leg = combo.get_or_create_leg(&trade.symbol);
                apply_position_change(leg, trade);
            }
            combo.refresh_combo_metrics();
            return;
        }

        if trade.symbol.ends_with("-STK") {
            let pos = holding
                .underlying
                .get_or_insert_with(|| Position::new(trade.symbol.clone(), 1));
            apply_position_change(pos, trade);
        } else {
            let pos = holding
                .options
                .entry(trade.symbol.clone())
                .or_insert_with(|| Position::new(trade.symbol.clone(), 100));
            apply_position_change(pos, trade);
        }
    }

    /// Refresh every live position's greeks/mid from the Contract/Portfolio
    /// Store and recompute the strategy's summary, per the timer tick.
    pub fn update_metrics(&self, strategy_name: &str, store: &ContractStore) {
        let Some(mut holding) = self.holdings.get_mut(strategy_name) else {
            return;
        };

        let mut current_value = Decimal::ZERO;
        let mut total_cost = Decimal::ZERO;
        let mut realized = Decimal::ZERO;
        let mut delta = Decimal::ZERO;
        let mut gamma = Decimal::ZERO;
        let mut theta = Decimal::ZERO;
        let mut vega = Decimal::ZERO;

        for pos in holding.options.values_mut() {
            refresh_leg_snapshot(pos, store);
            accumulate(pos, &mut current_value, &mut total_cost, &mut realized, &mut delta, &mut gamma, &mut theta, &mut vega);
            pos.clear_fields_if_flat();
        }

        if let Some(underlying) = holding.underlying.as_mut() {
            refresh_underlying_snapshot(underlying, store);
            accumulate(underlying, &mut current_value, &mut total_cost, &mut realized, &mut delta, &mut gamma, &mut theta, &mut vega);
            underlying.clear_fields_if_flat();
        }

        for combo in holding.combos.values_mut() {
            for leg in combo.legs.iter_mut() {
                refresh_leg_snapshot(leg, store);
            }
            combo.refresh_combo_metrics();
            current_value += combo.legs.iter().map(|l| l.quantity * l.mid_price * Decimal::from(l.multiplier)).sum::<Decimal>();
            total_cost += combo.cost_value;
            realized += combo.realized_pnl;
            delta += combo.delta;
            gamma += combo.gamma;
            theta += combo.theta;
            vega += combo.vega;
        }

        let unrealized = current_value - total_cost;
        let summary = &mut holding.summary;
        summary.current_value = current_value.round_dp(2);
        summary.total_cost = total_cost.round_dp(2);
        summary.unrealized_pnl = unrealized.round_dp(2);
        summary.realized_pnl = realized.round_dp(2);
        summary.pnl = (unrealized + realized).round_dp(2);
        summary.delta = delta.round_dp(4);
        summary.gamma = gamma.round_dp(4);
        summary.theta = theta.round_dp(4);
        summary.vega = vega.round_dp(4);
    }

    /// Compute the MARKET orders needed to flatten every position a strategy
    /// holds: underlying, then combos, then standalone options.
    pub fn close_all_strategy_positions(&self, strategy_name: &str) -> Vec<CloseInstruction> {
        let Some(holding) = self.holdings.get(strategy_name) else {
            return vec![];
        };

        let mut instructions = Vec::new();
        if let Some(instr) = close_underlying_instruction(&holding) {
            instructions.push(instr);
        }
        instructions.extend(close_all_combo_instructions(&holding));
        instructions.extend(close_all_option_instructions(&holding));
        instructions
    }

    pub fn close_underlying_position(&self, strategy_name: &str) -> Option<CloseInstruction> {
        let holding = self.holdings.get(strategy_name)?;
        close_underlying_instruction(&holding)
    }

    pub fn close_all_combo_positions(&self, strategy_name: &str) -> Vec<CloseInstruction> {
        let Some(holding) = self.holdings.get(strategy_name) else {
            return vec![];
        };
        close_all_combo_instructions(&holding)
    }

    pub fn close_all_option_positions(&self, strategy_name: &str) -> Vec<CloseInstruction> {
        let Some(holding) = self.holdings.get(strategy_name) else {
            return vec![];
        };
        close_all_option_instructions(&holding)
    }

    /// Flatten a single standalone option leg, by symbol.
    pub fn close_option_position(&self, strategy_name: &str, symbol: &str) -> Option<CloseInstruction> {
        let holding = self.holdings.get(strategy_name)?;
        let pos = holding.options.get(symbol)?;
        close_option_instruction(pos)
    }

    /// Flatten a single combo, by symbol.
    pub fn close_combo_position(&self, strategy_name: &str, symbol: &str) -> Option<CloseInstruction> {
        let holding = self.holdings.get(strategy_name)?;
        let combo = holding.combos.get(symbol)?;
        close_combo_instruction(combo)
    }

    pub fn serialize_holding(&self, strategy_name: &str) -> Option<StrategyHolding> {
        self.holdings.get(strategy_name).map(|h| h.clone())
    }

    pub fn load_serialized_holding(&self, strategy_name: &str, holding: StrategyHolding) {
        self.holdings.insert(strategy_name.to_string(), holding);
    }
}

impl Default for PositionEngine {
    fn default() -> Self {
        Self::new()
    }
}

fn refresh_leg_snapshot(pos: &mut Position, store: &ContractStore) {
    if let Some(snapshot) = store.get_option(&pos.symbol) {
        pos.mid_price = snapshot.mid_price.round_dp(2);
        pos.delta = snapshot.delta.round_dp(4);
        pos.gamma = snapshot.gamma.round_dp(4);
        pos.theta = snapshot.theta.round_dp(4);
        pos.vega = snapshot.vega.round_dp(4);
    }
}

/// The underlying never appears in the option chain, so its greeks come
/// from the portfolio's own underlying snapshot instead of `get_option`.
/// `theo_delta` is the contract size (1 for equity/index per §4.E.4): the
/// underlying's delta contribution is quantity times that, not zero.
fn refresh_underlying_snapshot(pos: &mut Position, store: &ContractStore) {
    let Ok(underlying_symbol) = otc_types::parse_underlying_symbol(&pos.symbol) else {
        return;
    };
    let Some(underlying) = store.get_portfolio(&underlying_symbol.root).and_then(|p| p.underlying) else {
        return;
    };
    pos.mid_price = underlying.mid_price.round_dp(2);
    pos.delta = underlying.theo_delta.round_dp(4);
}

#[allow(clippy::too_many_arguments)]
fn accumulate(
    pos: &Position,
    current_value: &mut Decimal,
    total_cost: &mut Decimal,
    realized: &mut Decimal,
    delta: &mut Decimal,
    gamma: &mut Decimal,
    theta: &mut Decimal,
    vega: &mut Decimal,
) {
    *current_value += pos.quantity * pos.mid_price * Decimal::from(pos.multiplier);
    *total_cost += pos.cost_value;
    *realized += pos.realized_pnl;
    *delta += pos.quantity * pos.delta;
    *gamma += pos.quantity * pos.gamma;
    *theta += pos.quantity * pos.theta;
    *vega += pos.quantity * pos.vega;
}

/// Find the existing combo matching `symbol` (exact or via the normalized
/// root+signature key, ignoring the declared combo type), or create one.
fn get_or_create_combo_position<'a>(
    holding: &'a mut StrategyHolding,
    symbol: &str,
    combo_type: ComboType,
    legs_meta: Option<&[Leg]>,
) -> &'a mut ComboPosition {
    if holding.combos.contains_key(symbol) {
        return holding.combos.get_mut(symbol).unwrap();
    }

    let normalized = normalize_combo_symbol(symbol);
    if let Some(existing_key) = holding
        .combos
        .keys()
        .find(|k| normalize_combo_symbol(k) == normalized)
        .cloned()
    {
        return holding.combos.get_mut(&existing_key).unwrap();
    }

    let mut combo = ComboPosition::new(symbol, combo_type);
    if let Some(legs) = legs_meta {
        for leg in legs {
            combo.get_or_create_leg(&leg.symbol);
        }
    }
    holding.combos.insert(symbol.to_string(), combo);
    holding.combos.get_mut(symbol).unwrap()
}

/// Strip the `{combo_type}` segment for duplicate matching: `ROOT_TYPE_SIG`
/// collapses to `ROOT_SIG`.
fn normalize_combo_symbol(symbol: &str) -> String {
    let parts: Vec<&str> = symbol.splitn(3, '_').collect();
    if parts.len() >= 3 {
        format!("{}_{}", parts[0], parts[2])
    } else {
        symbol.to_string()
    }
}

fn close_underlying_instruction(holding: &StrategyHolding) -> Option<CloseInstruction> {
    let pos = holding.underlying.as_ref()?;
    if pos.quantity.is_zero() {
        return None;
    }
    let direction = if pos.quantity > Decimal::ZERO { Direction::Short } else { Direction::Long };
    Some(CloseInstruction {
        kind: CloseKind::Underlying,
        symbol: pos.symbol.clone(),
        direction,
        volume: pos.quantity.abs(),
        combo_type: None,
        leg_symbols: vec![],
    })
}

fn close_combo_instruction(combo: &ComboPosition) -> Option<CloseInstruction> {
    if combo.quantity.is_zero() {
        return None;
    }
    let direction = if combo.quantity > Decimal::ZERO { Direction::Short } else { Direction::Long };
    Some(CloseInstruction {
        kind: CloseKind::Combo,
        symbol: combo.symbol.clone(),
        direction,
        volume: combo.quantity.abs(),
        combo_type: Some(ComboType::Custom),
        leg_symbols: combo.legs.iter().map(|l| l.symbol.clone()).collect(),
    })
}

fn close_option_instruction(pos: &Position) -> Option<CloseInstruction> {
    if pos.quantity.is_zero() {
        return None;
    }
    let direction = if pos.quantity > Decimal::ZERO { Direction::Short } else { Direction::Long };
    Some(CloseInstruction {
        kind: CloseKind::Option,
        symbol: pos.symbol.clone(),
        direction,
        volume: pos.quantity.abs(),
        combo_type: None,
        leg_symbols: vec![],
    })
}

fn close_all_combo_instructions(holding: &StrategyHolding) -> Vec<CloseInstruction> {
    holding.combos.values().filter_map(close_combo_instruction).collect()
}

fn close_all_option_instructions(holding: &StrategyHolding) -> Vec<CloseInstruction> {
    holding.options.values().filter_map(close_option_instruction).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use otc_types::OrderStatus;
    use rust_decimal_macros::dec;

    fn order(orderid: &str, symbol: &str) -> Order {
        Order {
            orderid: orderid.into(),
            symbol: symbol.into(),
            exchange: "SMART".into(),
            direction: Direction::Long,
            order_type: otc_types::OrderType::Market,
            price: Decimal::ZERO,
            volume: dec!(1),
            traded: dec!(0),
            status: OrderStatus::AllTraded,
            is_combo: false,
            legs: None,
            combo_type: None,
            reference: "test".into(),
            strategy_name: Some("strat1".into()),
        }
    }

    fn trade(orderid: &str, symbol: &str, direction: Direction, price: Decimal, volume: Decimal) -> Trade {
        Trade {
            tradeid: format!("t-{orderid}"),
            orderid: orderid.into(),
            symbol: symbol.into(),
            direction,
            price,
            volume,
            time: Utc::now(),
        }
    }

    #[test]
    fn duplicate_tradeid_applied_only_once() {
        let engine = PositionEngine::new();
        engine.get_create_strategy_holding("strat1");
        engine.process_order(&order("o1", "SPY-20251024-C-450-100-USD-OPT"));

        let t = trade("o1", "SPY-20251024-C-450-100-USD-OPT", Direction::Long, dec!(2.00), dec!(1));
        engine.process_trade("strat1", &t);
        engine.process_trade("strat1", &t);

        let holding = engine.holding("strat1").unwrap();
        let pos = holding.options.get("SPY-20251024-C-450-100-USD-OPT").unwrap();
        assert_eq!(pos.quantity, dec!(1));
    }

    #[test]
    fn underlying_trade_routes_by_stk_suffix() {
        let engine = PositionEngine::new();
        engine.get_create_strategy_holding("strat1");
        engine.process_order(&order("o2", "SPY-USD-STK"));
        engine.process_trade("strat1", &trade("o2", "SPY-USD-STK", Direction::Long, dec!(450), dec!(10)));

        let holding = engine.holding("strat1").unwrap();
        assert_eq!(holding.underlying.unwrap().quantity, dec!(10));
    }

    #[test]
    fn close_all_emits_nothing_when_flat() {
        let engine = PositionEngine::new();
        engine.get_create_strategy_holding("strat1");
        assert!(engine.close_all_strategy_positions("strat1").is_empty());
    }

    #[test]
    fn close_underlying_direction_opposes_current_side() {
        let engine = PositionEngine::new();
        engine.get_create_strategy_holding("strat1");
        engine.process_order(&order("o3", "SPY-USD-STK"));
        engine.process_trade("strat1", &trade("o3", "SPY-USD-STK", Direction::Long, dec!(450), dec!(10)));

        let instr = engine.close_underlying_position("strat1").unwrap();
        assert_eq!(instr.direction, Direction::Short);
        assert_eq!(instr.volume, dec!(10));
    }

    #[test]
    fn serialize_then_load_round_trips_quantities() {
        let engine = PositionEngine::new();
        engine.get_create_strategy_holding("strat1");
        engine.process_order(&order("o4", "SPY-USD-STK"));
        engine.process_trade("strat1", &trade("o4", "SPY-USD-STK", Direction::Long, dec!(450), dec!(10)));

        let snapshot = engine.serialize_holding("strat1").unwrap();
        let yaml = serde_yaml::to_string(&snapshot).unwrap();
        let restored: StrategyHolding = serde_yaml::from_str(&yaml).unwrap();

        engine.remove_strategy_holding("strat1");
        engine.load_serialized_holding("strat1", restored);

        let holding = engine.holding("strat1").unwrap();
        assert_eq!(holding.underlying.unwrap().quantity, dec!(10));
    }
}
