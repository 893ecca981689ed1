//! Bidirectional conversion between the canonical symbol string format and
//! structured fields. Pure: no I/O, no external state.
//!
//! Formats:
//!   underlying: `{ROOT}-USD-STK`
//!   option:     `{ROOT}-{YYYYMMDD}-{C|P}-{STRIKE}-{MULT}-USD-OPT`
//!   combo:      `{ROOT}_{COMBO_TYPE}_{SIG}`

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::SymbolError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptionRight {
    Call,
    Put,
}

impl OptionRight {
    pub fn letter(&self) -> &'static str {
        match self {
            OptionRight::Call => "C",
            OptionRight::Put => "P",
        }
    }

    pub fn sign(&self) -> i32 {
        match self {
            OptionRight::Call => 1,
            OptionRight::Put => -1,
        }
    }
}

impl FromStr for OptionRight {
    type Err = SymbolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "C" => Ok(OptionRight::Call),
            "P" => Ok(OptionRight::Put),
            other => Err(SymbolError::ParseError {
                symbol: other.to_string(),
                reason: "expected C or P".into(),
            }),
        }
    }
}

/// A parsed underlying (equity/index) symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnderlyingSymbol {
    pub root: String,
}

impl fmt::Display for UnderlyingSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-USD-STK", self.root)
    }
}

/// A parsed option symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionSymbol {
    pub root: String,
    pub expiry: NaiveDate,
    pub right: OptionRight,
    pub strike: Decimal,
    pub multiplier: u32,
}

impl OptionSymbol {
    pub fn chain_symbol(&self) -> String {
        format!("{}_{}", self.root, self.expiry.format("%Y%m%d"))
    }

    /// The `{YYYYMMDD}{C|P}{STRIKE}` token used by combo signatures.
    pub fn signature_token(&self) -> String {
        format!(
            "{}{}{}",
            self.expiry.format("%Y%m%d"),
            self.right.letter(),
            format_strike(self.strike)
        )
    }
}

impl fmt::Display for OptionSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{}-{}-{}-USD-OPT",
            self.root,
            self.expiry.format("%Y%m%d"),
            self.right.letter(),
            format_strike(self.strike),
            self.multiplier
        )
    }
}

fn format_strike(strike: Decimal) -> String {
    let normalized = strike.normalize();
    normalized.to_string()
}

/// A synthetic combo symbol: `{ROOT}_{COMBO_TYPE}_{SIG}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComboSymbol {
    pub root: String,
    pub combo_type: String,
    pub signature: String,
}

impl ComboSymbol {
    /// The part of the symbol used for duplicate matching: root + signature,
    /// with the combo-type segment stripped. Two combos with identical legs
    /// but different declared shapes therefore collapse onto one position —
    /// see the hedging/position engine design notes for why that's accepted.
    pub fn normalized_key(&self) -> String {
        format!("{}_{}", self.root, self.signature)
    }
}

impl fmt::Display for ComboSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}", self.root, self.combo_type, self.signature)
    }
}

/// Any of the three symbol shapes the codec understands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ParsedSymbol {
    Underlying(UnderlyingSymbol),
    Option(OptionSymbol),
    Combo(ComboSymbol),
}

impl fmt::Display for ParsedSymbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParsedSymbol::Underlying(u) => write!(f, "{u}"),
            ParsedSymbol::Option(o) => write!(f, "{o}"),
            ParsedSymbol::Combo(c) => write!(f, "{c}"),
        }
    }
}

/// Parse a symbol string into its structured form. Dispatches on the
/// presence of an underscore (combo) versus a trailing `-STK`/`-OPT`.
pub fn parse_symbol(symbol: &str) -> Result<ParsedSymbol, SymbolError> {
    if symbol.contains('_') {
        return parse_combo_symbol(symbol).map(ParsedSymbol::Combo);
    }
    if symbol.ends_with("-STK") {
        return parse_underlying_symbol(symbol).map(ParsedSymbol::Underlying);
    }
    if symbol.ends_with("-OPT") {
        return parse_option_symbol(symbol).map(ParsedSymbol::Option);
    }
    Err(SymbolError::ParseError {
        symbol: symbol.to_string(),
        reason: "unrecognized symbol shape".into(),
    })
}

pub fn parse_underlying_symbol(symbol: &str) -> Result<UnderlyingSymbol, SymbolError> {
    let parts: Vec<&str> = symbol.split('-').collect();
    if parts.len() != 3 || parts[1] != "USD" || parts[2] != "STK" {
        return Err(SymbolError::ParseError {
            symbol: symbol.to_string(),
            reason: "expected {ROOT}-USD-STK".into(),
        });
    }
    Ok(UnderlyingSymbol {
        root: parts[0].to_string(),
    })
}

pub fn parse_option_symbol(symbol: &str) -> Result<OptionSymbol, SymbolError> {
    let parts: Vec<&str> = symbol.split('-').collect();
    if parts.len() != 7 || parts[5] != "USD" || parts[6] != "OPT" {
        return Err(SymbolError::ParseError {
            symbol: symbol.to_string(),
            reason: "expected {ROOT}-{YYYYMMDD}-{C|P}-{STRIKE}-{MULT}-USD-OPT".into(),
        });
    }
    let root = parts[0].to_string();
    let expiry = NaiveDate::parse_from_str(parts[1], "%Y%m%d").map_err(|e| SymbolError::ParseError {
        symbol: symbol.to_string(),
        reason: format!("invalid expiry: {e}"),
    })?;
    let right = parts[2].parse::<OptionRight>()?;
    let strike = Decimal::from_str(parts[3]).map_err(|e| SymbolError::ParseError {
        symbol: symbol.to_string(),
        reason: format!("invalid strike: {e}"),
    })?;
    let multiplier: u32 = parts[4].parse().map_err(|_| SymbolError::ParseError {
        symbol: symbol.to_string(),
        reason: "invalid multiplier".into(),
    })?;
    Ok(OptionSymbol {
        root,
        expiry,
        right,
        strike,
        multiplier,
    })
}

pub fn parse_combo_symbol(symbol: &str) -> Result<ComboSymbol, SymbolError> {
    let parts: Vec<&str> = symbol.splitn(3, '_').collect();
    if parts.len() != 3 {
        return Err(SymbolError::ParseError {
            symbol: symbol.to_string(),
            reason: "expected {ROOT}_{COMBO_TYPE}_{SIG}".into(),
        });
    }
    Ok(ComboSymbol {
        root: parts[0].to_string(),
        combo_type: parts[1].to_string(),
        signature: parts[2].to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn round_trips_underlying_symbol() {
        let s = "SPY-USD-STK";
        let parsed = parse_underlying_symbol(s).unwrap();
        assert_eq!(parsed.to_string(), s);
    }

    #[test]
    fn round_trips_option_symbol() {
        let s = "SPY-20251024-C-450-100-USD-OPT";
        let parsed = parse_option_symbol(s).unwrap();
        assert_eq!(parsed.root, "SPY");
        assert_eq!(parsed.right, OptionRight::Call);
        assert_eq!(parsed.strike, dec!(450));
        assert_eq!(parsed.multiplier, 100);
        assert_eq!(parsed.to_string(), s);
        assert_eq!(parsed.chain_symbol(), "SPY_20251024");
        assert_eq!(parsed.signature_token(), "20251024C450");
    }

    #[test]
    fn round_trips_combo_symbol() {
        let s = "SPY_STRADDLE_20251024C450-20251024P450";
        let parsed = parse_combo_symbol(s).unwrap();
        assert_eq!(parsed.root, "SPY");
        assert_eq!(parsed.combo_type, "STRADDLE");
        assert_eq!(parsed.to_string(), s);
    }

    #[test]
    fn combo_normalized_key_drops_combo_type() {
        let a = ComboSymbol {
            root: "SPY".into(),
            combo_type: "STRADDLE".into(),
            signature: "20251024C450-20251024P450".into(),
        };
        let b = ComboSymbol {
            root: "SPY".into(),
            combo_type: "CUSTOM".into(),
            signature: "20251024C450-20251024P450".into(),
        };
        assert_eq!(a.normalized_key(), b.normalized_key());
    }

    #[test]
    fn rejects_malformed_symbol() {
        assert!(parse_symbol("garbage").is_err());
        assert!(parse_option_symbol("SPY-20251024-X-450-100-USD-OPT").is_err());
    }

    #[test]
    fn dispatches_on_shape() {
        assert!(matches!(
            parse_symbol("SPY-USD-STK").unwrap(),
            ParsedSymbol::Underlying(_)
        ));
        assert!(matches!(
            parse_symbol("SPY-20251024-C-450-100-USD-OPT").unwrap(),
            ParsedSymbol::Option(_)
        ));
        assert!(matches!(
            parse_symbol("SPY_STRADDLE_sig").unwrap(),
            ParsedSymbol::Combo(_)
        ));
    }
}
