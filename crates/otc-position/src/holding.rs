//! Position accounting: the cost-basis/realized-P&L state machine applied to
//! every fill, plus the per-strategy container it lives in.

use std::collections::HashMap;

use rust_decimal::Decimal;
use rust_decimal::prelude::Signed;
use serde::{Deserialize, Serialize};

use otc_types::{ComboType, Direction, Trade};

/// A single-instrument position (underlying leg, standalone option, or one
/// leg inside a combo). Quantity is signed: positive long, negative short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub cost_value: Decimal,
    pub realized_pnl: Decimal,
    pub mid_price: Decimal,
    pub delta: Decimal,
    pub gamma: Decimal,
    pub theta: Decimal,
    pub vega: Decimal,
    pub multiplier: u32,
}

impl Position {
    pub fn new(symbol: impl Into<String>, multiplier: u32) -> Self {
        Self {
            symbol: symbol.into(),
            quantity: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            cost_value: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            mid_price: Decimal::ZERO,
            delta: Decimal::ZERO,
            gamma: Decimal::ZERO,
            theta: Decimal::ZERO,
            vega: Decimal::ZERO,
            multiplier,
        }
    }

    /// Clear fields that only make sense while the position is open, after a
    /// metrics pass. `realized_pnl` survives — it is a running total, not a
    /// snapshot of current exposure.
    pub fn clear_fields_if_flat(&mut self) {
        if self.quantity == Decimal::ZERO {
            self.avg_cost = Decimal::ZERO;
            self.cost_value = Decimal::ZERO;
            self.mid_price = Decimal::ZERO;
            self.delta = Decimal::ZERO;
            self.gamma = Decimal::ZERO;
            self.theta = Decimal::ZERO;
            self.vega = Decimal::ZERO;
        }
    }
}

/// Apply one fill's cost/P&L effect to `pos`, per the open/close state
/// machine: same-sign fills widen the position and weight-average the cost;
/// opposite-sign fills realize P&L on the closed portion and, if the fill
/// overshoots the open size, reverse into the new direction at the fill
/// price.
pub fn apply_position_change(pos: &mut Position, trade: &Trade) {
    let qty = trade.volume.abs();
    let signed = if trade.direction == Direction::Long { qty } else { -qty };
    let prev_qty = pos.quantity;
    let multiplier = Decimal::from(pos.multiplier);
    let price = trade.price;

    let same_sign_or_fresh = prev_qty.is_zero()
        || (prev_qty > Decimal::ZERO && signed > Decimal::ZERO)
        || (prev_qty < Decimal::ZERO && signed < Decimal::ZERO);

    if same_sign_or_fresh {
        let total_qty = prev_qty.abs() + qty;
        pos.avg_cost = if prev_qty.is_zero() {
            price.round_dp(2)
        } else {
            ((pos.avg_cost * prev_qty.abs() + price * qty) / total_qty).round_dp(2)
        };
        pos.quantity += signed;
        pos.cost_value = (pos.avg_cost * pos.quantity.abs() * multiplier).round_dp(2);
        return;
    }

    let close_qty = prev_qty.abs().min(qty);
    let pnl = if prev_qty > Decimal::ZERO {
        (price - pos.avg_cost) * close_qty
    } else {
        (pos.avg_cost - price) * close_qty
    };
    pos.realized_pnl += (pnl * multiplier).round_dp(2);

    let remaining = prev_qty.abs() - close_qty;
    if remaining.is_zero() {
        pos.quantity = Decimal::ZERO;
        pos.avg_cost = Decimal::ZERO;
        pos.cost_value = Decimal::ZERO;
    } else {
        pos.quantity = prev_qty.signum() * remaining;
        pos.cost_value = (pos.avg_cost * pos.quantity.abs() * multiplier).round_dp(2);
    }

    let extra = qty - close_qty;
    if extra > Decimal::ZERO {
        pos.avg_cost = price.round_dp(2);
        pos.quantity = signed.signum() * extra;
        pos.cost_value = (pos.avg_cost * pos.quantity.abs() * multiplier).round_dp(2);
    }
}

/// A multi-leg combo position. `quantity`/`avg_cost`/`cost_value` are
/// derived from the legs during `refresh_combo_metrics` rather than
/// accumulated directly on trade intake, since every fill that arrives for a
/// combo is reported against one of its legs' own symbols, not the
/// synthetic combo symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComboPosition {
    pub symbol: String,
    pub combo_type: ComboType,
    pub quantity: Decimal,
    pub avg_cost: Decimal,
    pub cost_value: Decimal,
    pub realized_pnl: Decimal,
    pub mid_price: Decimal,
    pub delta: Decimal,
    pub gamma: Decimal,
    pub theta: Decimal,
    pub vega: Decimal,
    pub multiplier: u32,
    pub legs: Vec<Position>,
}

impl ComboPosition {
    pub fn new(symbol: impl Into<String>, combo_type: ComboType) -> Self {
        Self {
            symbol: symbol.into(),
            combo_type,
            quantity: Decimal::ZERO,
            avg_cost: Decimal::ZERO,
            cost_value: Decimal::ZERO,
            realized_pnl: Decimal::ZERO,
            mid_price: Decimal::ZERO,
            delta: Decimal::ZERO,
            gamma: Decimal::ZERO,
            theta: Decimal::ZERO,
            vega: Decimal::ZERO,
            multiplier: 100,
            legs: Vec::new(),
        }
    }

    pub fn leg_mut(&mut self, symbol: &str) -> Option<&mut Position> {
        self.legs.iter_mut().find(|leg| leg.symbol == symbol)
    }

    pub fn get_or_create_leg(&mut self, symbol: &str) -> &mut Position {
        if let Some(idx) = self.legs.iter().position(|leg| leg.symbol == symbol) {
            return &mut self.legs[idx];
        }
        self.legs.push(Position::new(symbol, 100));
        self.legs.last_mut().unwrap()
    }

    /// Recompute quantity/avg_cost/cost_value/realized_pnl/greeks from the
    /// current leg states. Quantity is the smallest per-ratio leg size still
    /// open, so a combo is only "complete" to the extent every leg has
    /// filled.
    pub fn refresh_combo_metrics(&mut self) {
        self.realized_pnl = self.legs.iter().map(|leg| leg.realized_pnl).sum();
        self.cost_value = self.legs.iter().map(|leg| leg.cost_value).sum();
        self.delta = self.legs.iter().map(|leg| leg.quantity * leg.delta).sum();
        self.gamma = self.legs.iter().map(|leg| leg.quantity * leg.gamma).sum();
        self.theta = self.legs.iter().map(|leg| leg.quantity * leg.theta).sum();
        self.vega = self.legs.iter().map(|leg| leg.quantity * leg.vega).sum();

        let open_sizes: Vec<Decimal> = self
            .legs
            .iter()
            .filter(|leg| !leg.quantity.is_zero())
            .map(|leg| leg.quantity.abs())
            .collect();

        self.quantity = if open_sizes.is_empty() {
            Decimal::ZERO
        } else {
            open_sizes.into_iter().fold(Decimal::MAX, Decimal::min)
        };

        self.avg_cost = if self.quantity.is_zero() {
            Decimal::ZERO
        } else {
            (self.cost_value / (self.quantity * Decimal::from(self.multiplier))).round_dp(2)
        };

        if self.quantity.is_zero() {
            self.cost_value = Decimal::ZERO;
        }
        self.delta = self.delta.round_dp(4);
        self.gamma = self.gamma.round_dp(4);
        self.theta = self.theta.round_dp(4);
        self.vega = self.vega.round_dp(4);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSummary {
    pub total_cost: Decimal,
    pub current_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
    pub pnl: Decimal,
    pub delta: Decimal,
    pub gamma: Decimal,
    pub theta: Decimal,
    pub vega: Decimal,
}

/// All positions a single strategy instance holds: one underlying leg, a
/// symbol-keyed table of standalone option legs, and a symbol-keyed table of
/// combos.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyHolding {
    pub underlying: Option<Position>,
    pub options: HashMap<String, Position>,
    pub combos: HashMap<String, ComboPosition>,
    pub summary: PortfolioSummary,
}

impl StrategyHolding {
    pub fn new() -> Self {
        Self {
            underlying: None,
            options: HashMap::new(),
            combos: HashMap::new(),
            summary: PortfolioSummary::default(),
        }
    }
}

impl Default for StrategyHolding {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn trade(symbol: &str, direction: Direction, price: Decimal, volume: Decimal) -> Trade {
        Trade {
            tradeid: format!("t-{symbol}-{price}-{volume}"),
            orderid: "o1".into(),
            symbol: symbol.into(),
            direction,
            price,
            volume,
            time: Utc::now(),
        }
    }

    #[test]
    fn straddle_open_then_flat_matches_scenario_s1() {
        let mut combo = ComboPosition::new("SPY_STRADDLE_sig", ComboType::Straddle);
        let call = "SPY-20251024-C-450-100-USD-OPT";
        let put = "SPY-20251024-P-450-100-USD-OPT";
        combo.get_or_create_leg(call);
        combo.get_or_create_leg(put);

        apply_position_change(combo.leg_mut(call).unwrap(), &trade(call, Direction::Long, dec!(2.00), dec!(1)));
        apply_position_change(combo.leg_mut(put).unwrap(), &trade(put, Direction::Long, dec!(1.50), dec!(1)));
        combo.refresh_combo_metrics();

        assert_eq!(combo.quantity, dec!(1));
        assert_eq!(combo.avg_cost, dec!(3.50));
        assert_eq!(combo.cost_value, dec!(350.00));

        combo.leg_mut(call).unwrap().mid_price = dec!(2.10);
        combo.leg_mut(put).unwrap().mid_price = dec!(1.40);

        apply_position_change(combo.leg_mut(call).unwrap(), &trade(call, Direction::Short, dec!(2.20), dec!(1)));
        apply_position_change(combo.leg_mut(put).unwrap(), &trade(put, Direction::Short, dec!(1.20), dec!(1)));
        combo.refresh_combo_metrics();

        assert_eq!(combo.quantity, dec!(0));
        assert_eq!(combo.realized_pnl, dec!(-10.00));
    }

    #[test]
    fn underlying_reversal_matches_scenario_s2() {
        let mut pos = Position::new("SPY-USD-STK", 1);
        pos.quantity = dec!(5);
        pos.avg_cost = dec!(100);
        pos.cost_value = dec!(500);

        apply_position_change(&mut pos, &trade("SPY-USD-STK", Direction::Short, dec!(110), dec!(8)));

        assert_eq!(pos.realized_pnl, dec!(50.00));
        assert_eq!(pos.quantity, dec!(-3));
        assert_eq!(pos.avg_cost, dec!(110));
        assert_eq!(pos.cost_value, dec!(330.00));
    }

    #[test]
    fn flat_position_clears_cost_fields_but_keeps_realized_pnl() {
        let mut pos = Position::new("SPY-USD-STK", 1);
        pos.quantity = dec!(2);
        pos.avg_cost = dec!(10);
        pos.realized_pnl = dec!(42);

        apply_position_change(&mut pos, &trade("SPY-USD-STK", Direction::Short, dec!(12), dec!(2)));
        pos.clear_fields_if_flat();

        assert_eq!(pos.quantity, dec!(0));
        assert_eq!(pos.avg_cost, dec!(0));
        assert_eq!(pos.realized_pnl, dec!(46.00));
    }
}
