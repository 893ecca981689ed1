//! In-memory contract/portfolio store. Single-writer-per-field discipline:
//! `ingest_contract` is called only from the contract-ingestion path,
//! `ingest_quote` only from the market-data polling thread. Reads never lock.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;

use otc_types::{Contract, OptionRight, ProductType};

/// A snapshot of one option's live market data, pre-multiplied by contract
/// size for delta/gamma as the spec requires.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionSnapshot {
    pub symbol: String,
    pub strike: Decimal,
    pub right: OptionRight,
    pub expiry: NaiveDate,
    pub mid_price: Decimal,
    pub delta: Decimal,
    pub gamma: Decimal,
    pub theta: Decimal,
    pub vega: Decimal,
    pub mid_iv: Decimal,
}

impl OptionSnapshot {
    fn new_flat(symbol: &str, strike: Decimal, right: OptionRight, expiry: NaiveDate) -> Self {
        Self {
            symbol: symbol.to_string(),
            strike,
            right,
            expiry,
            mid_price: Decimal::ZERO,
            delta: Decimal::ZERO,
            gamma: Decimal::ZERO,
            theta: Decimal::ZERO,
            vega: Decimal::ZERO,
            mid_iv: Decimal::ZERO,
        }
    }
}

/// Market data update applied to a single option leg by the poller.
#[derive(Debug, Clone)]
pub struct QuoteUpdate {
    pub symbol: String,
    pub mid_price: Decimal,
    pub delta: Decimal,
    pub gamma: Decimal,
    pub theta: Decimal,
    pub vega: Decimal,
    pub mid_iv: Decimal,
}

#[derive(Debug, Clone, Default)]
pub struct UnderlyingSnapshot {
    pub symbol: String,
    pub mid_price: Decimal,
    /// Per-contract delta of one share, i.e. 1 for a plain equity/index.
    pub theo_delta: Decimal,
}

/// A chain keyed `{root}_{yyyymmdd}`, holding calls/puts by strike.
#[derive(Debug, Clone, Default)]
pub struct ChainSnapshot {
    pub chain_symbol: String,
    pub calls: BTreeMap<Decimal, String>,
    pub puts: BTreeMap<Decimal, String>,
    pub atm_strike: Option<Decimal>,
}

impl ChainSnapshot {
    fn recompute_atm(&mut self, underlying_mid: Option<Decimal>) {
        let mut strikes: Vec<Decimal> = self
            .calls
            .keys()
            .chain(self.puts.keys())
            .copied()
            .collect();
        strikes.sort();
        strikes.dedup();
        if strikes.is_empty() {
            self.atm_strike = None;
            return;
        }
        self.atm_strike = match underlying_mid {
            Some(mid) if mid > Decimal::ZERO => strikes
                .into_iter()
                .min_by_key(|s| (*s - mid).abs()),
            _ => Some(strikes[strikes.len() / 2]),
        };
    }
}

/// Per-root aggregation: one underlying plus its expiry chains.
#[derive(Debug, Clone, Default)]
pub struct PortfolioSnapshot {
    pub root: String,
    pub underlying: Option<UnderlyingSnapshot>,
    pub chains: BTreeMap<String, ChainSnapshot>,
}

/// The Contract/Portfolio Store.
pub struct ContractStore {
    contracts: DashMap<String, Contract>,
    options: DashMap<String, OptionSnapshot>,
    portfolios: DashMap<String, PortfolioSnapshot>,
}

impl ContractStore {
    pub fn new() -> Self {
        Self {
            contracts: DashMap::new(),
            options: DashMap::new(),
            portfolios: DashMap::new(),
        }
    }

    pub fn get_contract(&self, symbol: &str) -> Option<Contract> {
        self.contracts.get(symbol).map(|c| c.clone())
    }

    pub fn get_option(&self, symbol: &str) -> Option<OptionSnapshot> {
        self.options.get(symbol).map(|o| o.clone())
    }

    pub fn get_portfolio(&self, root: &str) -> Option<PortfolioSnapshot> {
        self.portfolios.get(root).map(|p| p.clone())
    }

    /// Ingest a new contract. Equity/Index contracts set the portfolio's
    /// underlying; option contracts are added to a lazily-created chain
    /// keyed `{root}_{yyyymmdd}`.
    pub fn ingest_contract(&self, contract: Contract) {
        let root = root_of(&contract.symbol);
        self.contracts.insert(contract.symbol.clone(), contract.clone());

        let mut portfolio = self.portfolios.entry(root.clone()).or_insert_with(|| {
            PortfolioSnapshot {
                root: root.clone(),
                ..Default::default()
            }
        });

        match contract.product {
            ProductType::Equity | ProductType::Index => {
                portfolio.underlying = Some(UnderlyingSnapshot {
                    symbol: contract.symbol.clone(),
                    mid_price: Decimal::ZERO,
                    theo_delta: Decimal::ONE,
                });
            }
            ProductType::Option => {
                let (strike, right, expiry) = match (contract.strike, contract.option_right, contract.expiry) {
                    (Some(s), Some(r), Some(e)) => (s, r, e),
                    _ => return,
                };
                let chain_symbol = format!("{root}_{}", expiry.format("%Y%m%d"));
                let chain = portfolio.chains.entry(chain_symbol.clone()).or_insert_with(|| {
                    ChainSnapshot {
                        chain_symbol: chain_symbol.clone(),
                        ..Default::default()
                    }
                });
                match right {
                    OptionRight::Call => {
                        chain.calls.insert(strike, contract.symbol.clone());
                    }
                    OptionRight::Put => {
                        chain.puts.insert(strike, contract.symbol.clone());
                    }
                }
                self.options
                    .entry(contract.symbol.clone())
                    .or_insert_with(|| OptionSnapshot::new_flat(&contract.symbol, strike, right, expiry));
            }
        }
    }

    /// Apply a live quote. Sole writer is the market-data polling thread;
    /// readers tolerate torn per-field reads of primitive numeric values.
    pub fn ingest_quote(&self, update: QuoteUpdate) {
        if let Some(mut snapshot) = self.options.get_mut(&update.symbol) {
            snapshot.mid_price = update.mid_price;
            snapshot.delta = update.delta;
            snapshot.gamma = update.gamma;
            snapshot.theta = update.theta;
            snapshot.vega = update.vega;
            snapshot.mid_iv = update.mid_iv;
        }
        let root = root_of(&update.symbol);
        if let Some(mut portfolio) = self.portfolios.get_mut(&root) {
            let underlying_mid = portfolio.underlying.as_ref().map(|u| u.mid_price);
            for chain in portfolio.chains.values_mut() {
                chain.recompute_atm(underlying_mid);
            }
        }
    }

    /// Apply a live underlying quote.
    pub fn ingest_underlying_quote(&self, symbol: &str, mid_price: Decimal) {
        let root = root_of(symbol);
        if let Some(mut portfolio) = self.portfolios.get_mut(&root) {
            if let Some(underlying) = portfolio.underlying.as_mut() {
                underlying.mid_price = mid_price;
            }
            for chain in portfolio.chains.values_mut() {
                chain.recompute_atm(Some(mid_price));
            }
        }
    }

    /// ATM call IV, falling back to the ATM put's, per §4.C.1.
    pub fn atm_iv(&self, chain_symbol: &str) -> Option<Decimal> {
        let root = chain_symbol.split('_').next()?.to_string();
        let portfolio = self.portfolios.get(&root)?;
        let chain = portfolio.chains.get(chain_symbol)?;
        let atm = chain.atm_strike?;
        if let Some(symbol) = chain.calls.get(&atm) {
            if let Some(opt) = self.options.get(symbol) {
                if opt.mid_iv > Decimal::ZERO {
                    return Some(opt.mid_iv);
                }
            }
        }
        chain
            .puts
            .get(&atm)
            .and_then(|symbol| self.options.get(symbol).map(|o| o.mid_iv))
    }
}

impl Default for ContractStore {
    fn default() -> Self {
        Self::new()
    }
}

fn root_of(symbol: &str) -> String {
    symbol
        .split(['-', '_'])
        .next()
        .unwrap_or(symbol)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn underlying() -> Contract {
        Contract {
            symbol: "SPY-USD-STK".into(),
            exchange: "SMART".into(),
            product: ProductType::Equity,
            multiplier: 1,
            min_tick: dec!(0.01),
            strike: None,
            option_right: None,
            expiry: None,
            trading_class: None,
        }
    }

    fn option(strike: Decimal, right: OptionRight) -> Contract {
        Contract {
            symbol: format!("SPY-20251024-{}-{}-100-USD-OPT", right.letter(), strike),
            exchange: "SMART".into(),
            product: ProductType::Option,
            multiplier: 100,
            min_tick: dec!(0.01),
            strike: Some(strike),
            option_right: Some(right),
            expiry: Some(NaiveDate::from_ymd_opt(2025, 10, 24).unwrap()),
            trading_class: Some("SPY".into()),
        }
    }

    #[test]
    fn ingesting_option_creates_chain_under_root_yyyymmdd_key() {
        let store = ContractStore::new();
        store.ingest_contract(underlying());
        store.ingest_contract(option(dec!(450), OptionRight::Call));

        let portfolio = store.get_portfolio("SPY").unwrap();
        assert!(portfolio.chains.contains_key("SPY_20251024"));
        assert!(portfolio.underlying.is_some());
    }

    #[test]
    fn atm_strike_prefers_closest_to_underlying_mid() {
        let store = ContractStore::new();
        store.ingest_contract(underlying());
        store.ingest_contract(option(dec!(440), OptionRight::Call));
        store.ingest_contract(option(dec!(450), OptionRight::Call));
        store.ingest_contract(option(dec!(460), OptionRight::Call));

        store.ingest_underlying_quote("SPY-USD-STK", dec!(452));

        let portfolio = store.get_portfolio("SPY").unwrap();
        let chain = portfolio.chains.get("SPY_20251024").unwrap();
        assert_eq!(chain.atm_strike, Some(dec!(450)));
    }

    #[test]
    fn atm_strike_falls_back_to_median_without_underlying_price() {
        let store = ContractStore::new();
        store.ingest_contract(underlying());
        store.ingest_contract(option(dec!(440), OptionRight::Call));
        store.ingest_contract(option(dec!(450), OptionRight::Call));
        store.ingest_contract(option(dec!(460), OptionRight::Call));

        let symbol = "SPY-20251024-C-450-100-USD-OPT".to_string();
        store.ingest_quote(QuoteUpdate {
            symbol,
            mid_price: dec!(5),
            delta: dec!(0.5),
            gamma: dec!(0.01),
            theta: dec!(-0.02),
            vega: dec!(0.1),
            mid_iv: dec!(0.2),
        });

        let portfolio = store.get_portfolio("SPY").unwrap();
        let chain = portfolio.chains.get("SPY_20251024").unwrap();
        assert_eq!(chain.atm_strike, Some(dec!(450)));
    }

    #[test]
    fn quote_update_writes_all_greek_fields() {
        let store = ContractStore::new();
        store.ingest_contract(option(dec!(450), OptionRight::Call));
        let symbol = "SPY-20251024-C-450-100-USD-OPT".to_string();
        store.ingest_quote(QuoteUpdate {
            symbol: symbol.clone(),
            mid_price: dec!(2.10),
            delta: dec!(0.55),
            gamma: dec!(0.02),
            theta: dec!(-0.03),
            vega: dec!(0.12),
            mid_iv: dec!(0.18),
        });

        let snapshot = store.get_option(&symbol).unwrap();
        assert_eq!(snapshot.mid_price, dec!(2.10));
        assert_eq!(snapshot.delta, dec!(0.55));
    }
}
