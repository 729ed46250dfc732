//! Symbol and trading-rule cache
//!
//! Populated once from REST at bootstrap, refreshed by market-summary events,
//! read-only to everything else. The readiness flag gates order submission:
//! no order leaves this process before the venue's constraints are known.

use parking_lot::RwLock;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::info;

use crate::core::{Error, NewOrder, Result, Symbol};
use crate::valr_api::model::PairInfo;

/// Numeric constraints for one instrument.
#[derive(Debug, Clone)]
pub struct TradingRule {
    pub symbol: Symbol,
    pub venue_pair: String,
    pub min_base_amount: Decimal,
    pub max_base_amount: Decimal,
    pub tick_size: Decimal,
    pub base_increment: Decimal,
    pub min_quote_amount: Decimal,
}

pub struct InstrumentCache {
    rules: RwLock<HashMap<Symbol, TradingRule>>,
    by_venue: RwLock<HashMap<String, Symbol>>,
    last_price: RwLock<HashMap<Symbol, Decimal>>,
    ready: AtomicBool,
}

impl InstrumentCache {
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(HashMap::new()),
            by_venue: RwLock::new(HashMap::new()),
            last_price: RwLock::new(HashMap::new()),
            ready: AtomicBool::new(false),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Seed the cache from `/v1/public/pairs` and flip the readiness flag.
    pub fn populate(&self, pairs: &[PairInfo]) {
        let mut rules = self.rules.write();
        let mut by_venue = self.by_venue.write();

        for pair in pairs.iter().filter(|p| is_spot_pair(p)) {
            let symbol = Symbol::new(format!("{}-{}", pair.base_currency, pair.quote_currency));
            let rule = TradingRule {
                symbol: symbol.clone(),
                venue_pair: pair.symbol.clone(),
                min_base_amount: pair.min_base_amount.unwrap_or(Decimal::ZERO),
                max_base_amount: pair.max_base_amount.unwrap_or(Decimal::MAX),
                tick_size: pair.tick_size.unwrap_or(Decimal::ZERO),
                base_increment: pair
                    .base_decimal_places
                    .map(|dp| Decimal::new(1, dp))
                    .unwrap_or(Decimal::ZERO),
                min_quote_amount: pair.min_quote_amount.unwrap_or(Decimal::ZERO),
            };
            by_venue.insert(pair.symbol.clone(), symbol.clone());
            rules.insert(symbol, rule);
        }

        info!("trading rules loaded for {} instrument(s)", rules.len());
        drop(rules);
        drop(by_venue);
        self.ready.store(true, Ordering::Release);
    }

    pub fn rule(&self, symbol: &Symbol) -> Option<TradingRule> {
        self.rules.read().get(symbol).cloned()
    }

    pub fn symbol_for_venue(&self, venue_pair: &str) -> Option<Symbol> {
        self.by_venue.read().get(venue_pair).cloned()
    }

    pub fn note_last_price(&self, symbol: &Symbol, price: Decimal) {
        self.last_price.write().insert(symbol.clone(), price);
    }

    pub fn last_price(&self, symbol: &Symbol) -> Option<Decimal> {
        self.last_price.read().get(symbol).copied()
    }

    /// Gate an order against the instrument's constraints.
    pub fn validate(&self, order: &NewOrder) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotReady);
        }
        let rule = self
            .rule(&order.symbol)
            .ok_or_else(|| Error::UnknownEntity(format!("instrument {}", order.symbol)))?;

        if order.quantity < rule.min_base_amount {
            return Err(Error::InvalidOrder(format!(
                "quantity {} below minimum {}",
                order.quantity, rule.min_base_amount
            )));
        }
        if order.quantity > rule.max_base_amount {
            return Err(Error::InvalidOrder(format!(
                "quantity {} above maximum {}",
                order.quantity, rule.max_base_amount
            )));
        }
        if !rule.tick_size.is_zero() && !(order.price % rule.tick_size).is_zero() {
            return Err(Error::InvalidOrder(format!(
                "price {} not a multiple of tick size {}",
                order.price, rule.tick_size
            )));
        }
        if !rule.base_increment.is_zero() && !(order.quantity % rule.base_increment).is_zero() {
            return Err(Error::InvalidOrder(format!(
                "quantity {} not a multiple of increment {}",
                order.quantity, rule.base_increment
            )));
        }
        if order.price * order.quantity < rule.min_quote_amount {
            return Err(Error::InvalidOrder(format!(
                "notional below minimum {}",
                rule.min_quote_amount
            )));
        }
        Ok(())
    }
}

impl Default for InstrumentCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Active spot pairs only; derivative listings are not ours.
fn is_spot_pair(pair: &PairInfo) -> bool {
    pair.active && !pair.symbol.contains("_PERP") && !pair.symbol.contains("_FUTURES")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{OrderCategory, Side};

    fn pair_info() -> PairInfo {
        PairInfo {
            symbol: "BTCZAR".to_string(),
            base_currency: "BTC".to_string(),
            quote_currency: "ZAR".to_string(),
            active: true,
            min_base_amount: Some("0.0001".parse().unwrap()),
            max_base_amount: Some("10".parse().unwrap()),
            tick_size: Some("1".parse().unwrap()),
            base_decimal_places: Some(8),
            min_quote_amount: Some("10".parse().unwrap()),
        }
    }

    fn order(price: &str, qty: &str) -> NewOrder {
        NewOrder {
            symbol: Symbol::new("BTC-ZAR"),
            side: Side::Buy,
            price: price.parse().unwrap(),
            quantity: qty.parse().unwrap(),
            category: OrderCategory::Limit,
        }
    }

    #[test]
    fn test_submission_gated_until_ready() {
        let cache = InstrumentCache::new();
        assert!(matches!(cache.validate(&order("900000", "0.001")), Err(Error::NotReady)));

        cache.populate(&[pair_info()]);
        assert!(cache.is_ready());
        assert!(cache.validate(&order("900000", "0.001")).is_ok());
    }

    #[test]
    fn test_venue_mapping() {
        let cache = InstrumentCache::new();
        cache.populate(&[pair_info()]);
        assert_eq!(cache.symbol_for_venue("BTCZAR"), Some(Symbol::new("BTC-ZAR")));
        assert_eq!(cache.rule(&Symbol::new("BTC-ZAR")).unwrap().venue_pair, "BTCZAR");
        assert_eq!(Symbol::new("BTC-ZAR").to_venue(), "BTCZAR");
    }

    #[test]
    fn test_derivative_pairs_filtered() {
        let mut perp = pair_info();
        perp.symbol = "BTCZAR_PERP".to_string();
        let cache = InstrumentCache::new();
        cache.populate(&[perp]);
        assert!(cache.symbol_for_venue("BTCZAR_PERP").is_none());
    }

    #[test]
    fn test_constraint_violations() {
        let cache = InstrumentCache::new();
        cache.populate(&[pair_info()]);

        assert!(matches!(
            cache.validate(&order("900000", "0.00001")),
            Err(Error::InvalidOrder(_))
        ));
        assert!(matches!(
            cache.validate(&order("900000", "11")),
            Err(Error::InvalidOrder(_))
        ));
        assert!(matches!(
            cache.validate(&order("900000.5", "0.001")),
            Err(Error::InvalidOrder(_))
        ));
        assert!(matches!(
            cache.validate(&order("900000", "0.000000015")),
            Err(Error::InvalidOrder(_))
        ));
        // Unknown instrument.
        let mut other = order("1", "1");
        other.symbol = Symbol::new("ETH-ZAR");
        assert!(matches!(cache.validate(&other), Err(Error::UnknownEntity(_))));
    }
}
