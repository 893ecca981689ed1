//! Pure combo leg builder: given named option legs, an overall direction and
//! a volume, produces the per-leg `Leg` list (with true side encoded) and a
//! canonical signature used to deduplicate logically identical combos.

use std::collections::HashMap;

use otc_types::{ComboType, Direction, Leg, PositionError};

/// One leg input: the option's symbol string (parsed for its signature
/// token) and exchange/trading-class metadata to carry onto the `Leg`.
#[derive(Debug, Clone)]
pub struct LegInput {
    pub symbol: String,
    pub exchange: String,
    pub trading_class: Option<String>,
}

struct ShapeEntry {
    key: String,
    sign: i32,
    ratio_override: Option<u32>,
}

fn entry(key: &str, sign: i32, ratio_override: Option<u32>) -> ShapeEntry {
    ShapeEntry { key: key.to_string(), sign, ratio_override }
}

fn shape_table(combo_type: ComboType, custom_keys: &[String]) -> Vec<ShapeEntry> {
    match combo_type {
        ComboType::Straddle | ComboType::Strangle => vec![
            entry("call", 1, None),
            entry("put", 1, None),
        ],
        ComboType::Spread | ComboType::DiagonalSpread | ComboType::RiskReversal => vec![
            entry("long_leg", 1, None),
            entry("short_leg", -1, None),
        ],
        ComboType::RatioSpread => vec![
            entry("long_leg", 1, None),
            entry("short_leg", -1, Some(2)),
        ],
        ComboType::Butterfly => vec![
            entry("wing1", 1, None),
            entry("body", -1, Some(2)),
            entry("wing2", 1, None),
        ],
        ComboType::InverseButterfly => vec![
            entry("wing1", -1, None),
            entry("body", 1, Some(2)),
            entry("wing2", -1, None),
        ],
        ComboType::IronButterfly => vec![
            entry("put_wing", 1, None),
            entry("body", -1, Some(2)),
            entry("call_wing", 1, None),
        ],
        ComboType::IronCondor => vec![
            entry("put_lower", -1, None),
            entry("put_upper", 1, None),
            entry("call_lower", 1, None),
            entry("call_upper", -1, None),
        ],
        ComboType::Condor => vec![
            entry("long_put", 1, None),
            entry("short_put", -1, None),
            entry("short_call", -1, None),
            entry("long_call", 1, None),
        ],
        ComboType::BoxSpread => vec![
            entry("long_call", 1, None),
            entry("short_call", -1, None),
            entry("short_put", -1, None),
            entry("long_put", 1, None),
        ],
        ComboType::Custom => custom_keys.iter().map(|k| entry(k, 1, None)).collect(),
    }
}

/// Build the legs and canonical signature for `combo_type`. `ratio` overrides
/// the default short-leg multiplier for `RATIO_SPREAD` (default 2) when
/// `Some`.
pub fn build(
    combo_type: ComboType,
    legs_input: &HashMap<String, LegInput>,
    direction: Direction,
    ratio: Option<u32>,
) -> Result<(Vec<Leg>, String), PositionError> {
    let mut custom_keys: Vec<String> = legs_input.keys().cloned().collect();
    custom_keys.sort();
    let table = shape_table(combo_type, &custom_keys);

    let mut legs = Vec::with_capacity(table.len());
    for entry in &table {
        let input = legs_input.get(&entry.key).ok_or_else(|| PositionError::MissingLeg {
            combo_type: combo_type.name().to_string(),
            leg: entry.key.clone(),
        })?;
        let leg_direction = if entry.sign > 0 { direction } else { direction.opposite() };
        let leg_ratio = match (combo_type, entry.ratio_override) {
            (ComboType::RatioSpread, Some(_)) => ratio.unwrap_or(2),
            (_, Some(r)) => r,
            (_, None) => 1,
        };
        legs.push(Leg {
            symbol: input.symbol.clone(),
            exchange: input.exchange.clone(),
            direction: leg_direction,
            ratio: leg_ratio,
            price: None,
            trading_class: input.trading_class.clone(),
        });
    }

    let signature = generate_combo_signature(&legs)?;
    Ok((legs, signature))
}

/// Canonical signature: sorted join of each leg's `{YYYYMMDD}{C|P}{STRIKE}`
/// token, independent of input ordering.
pub fn generate_combo_signature(legs: &[Leg]) -> Result<String, PositionError> {
    let mut tokens: Vec<String> = Vec::with_capacity(legs.len());
    for leg in legs {
        let parsed = otc_types::symbol::parse_option_symbol(&leg.symbol).map_err(|_| PositionError::MissingLeg {
            combo_type: "signature".into(),
            leg: leg.symbol.clone(),
        })?;
        tokens.push(parsed.signature_token());
    }
    tokens.sort();
    Ok(tokens.join("-"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use otc_types::Direction;

    fn leg_input(symbol: &str) -> LegInput {
        LegInput {
            symbol: symbol.to_string(),
            exchange: "SMART".to_string(),
            trading_class: None,
        }
    }

    #[test]
    fn iron_condor_short_intent_matches_documented_signs() {
        let mut inputs = HashMap::new();
        inputs.insert("put_lower".to_string(), leg_input("SPY-20251024-P-430-100-USD-OPT"));
        inputs.insert("put_upper".to_string(), leg_input("SPY-20251024-P-440-100-USD-OPT"));
        inputs.insert("call_lower".to_string(), leg_input("SPY-20251024-C-460-100-USD-OPT"));
        inputs.insert("call_upper".to_string(), leg_input("SPY-20251024-C-470-100-USD-OPT"));

        let (legs, _sig) = build(ComboType::IronCondor, &inputs, Direction::Short, None).unwrap();

        let dir = |key: &str| legs.iter().find(|l| l.symbol.contains(key)).unwrap().direction;
        assert_eq!(dir("P-430"), Direction::Long);
        assert_eq!(dir("P-440"), Direction::Short);
        assert_eq!(dir("C-460"), Direction::Short);
        assert_eq!(dir("C-470"), Direction::Long);
    }

    #[test]
    fn iron_condor_long_intent_inverts_every_leg() {
        let mut inputs = HashMap::new();
        inputs.insert("put_lower".to_string(), leg_input("SPY-20251024-P-430-100-USD-OPT"));
        inputs.insert("put_upper".to_string(), leg_input("SPY-20251024-P-440-100-USD-OPT"));
        inputs.insert("call_lower".to_string(), leg_input("SPY-20251024-C-460-100-USD-OPT"));
        inputs.insert("call_upper".to_string(), leg_input("SPY-20251024-C-470-100-USD-OPT"));

        let (legs, _sig) = build(ComboType::IronCondor, &inputs, Direction::Long, None).unwrap();
        let dir = |key: &str| legs.iter().find(|l| l.symbol.contains(key)).unwrap().direction;
        assert_eq!(dir("P-430"), Direction::Short);
        assert_eq!(dir("C-470"), Direction::Short);
    }

    #[test]
    fn signature_is_independent_of_leg_input_order() {
        let mut a = HashMap::new();
        a.insert("call".to_string(), leg_input("SPY-20251024-C-450-100-USD-OPT"));
        a.insert("put".to_string(), leg_input("SPY-20251024-P-450-100-USD-OPT"));
        let (_legs_a, sig_a) = build(ComboType::Straddle, &a, Direction::Long, None).unwrap();

        let legs_b = vec![
            Leg { symbol: "SPY-20251024-P-450-100-USD-OPT".into(), exchange: "SMART".into(), direction: Direction::Long, ratio: 1, price: None, trading_class: None },
            Leg { symbol: "SPY-20251024-C-450-100-USD-OPT".into(), exchange: "SMART".into(), direction: Direction::Long, ratio: 1, price: None, trading_class: None },
        ];
        let sig_b = generate_combo_signature(&legs_b).unwrap();

        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn ratio_spread_applies_custom_ratio_to_short_leg() {
        let mut inputs = HashMap::new();
        inputs.insert("long_leg".to_string(), leg_input("SPY-20251024-C-450-100-USD-OPT"));
        inputs.insert("short_leg".to_string(), leg_input("SPY-20251024-C-460-100-USD-OPT"));

        let (legs, _sig) = build(ComboType::RatioSpread, &inputs, Direction::Long, Some(3)).unwrap();
        let short_leg = legs.iter().find(|l| l.symbol.contains("460")).unwrap();
        assert_eq!(short_leg.ratio, 3);
    }

    #[test]
    fn missing_leg_is_reported() {
        let inputs = HashMap::new();
        let result = build(ComboType::Straddle, &inputs, Direction::Long, None);
        assert!(result.is_err());
    }
}
