//! ETH price tables for the two valuation regimes

use std::collections::BTreeMap;
use std::fmt;

use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SettlementError};
use crate::fixed::{parse_ether, parse_raw, to_eth};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PriceRegime {
    /// Prices at the moment of the incident
    Settlement,
    /// Prices at the moment claims become redeemable
    Redemption,
}

impl fmt::Display for PriceRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PriceRegime::Settlement => write!(f, "settlement"),
            PriceRegime::Redemption => write!(f, "redemption"),
        }
    }
}

/// Underlying address -> ETH per whole token (18 decimals)
///
/// Keys are stored lowercase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PriceTable {
    regime: PriceRegime,
    prices: BTreeMap<String, BigInt>,
}

impl PriceTable {
    pub fn new(regime: PriceRegime) -> Self {
        Self {
            regime,
            prices: BTreeMap::new(),
        }
    }

    /// Build a table from price strings
    ///
    /// A plain integer is a raw 18-decimal value. A string with a decimal point is read
    /// as whole ETH, so `"1"` and `"0.000000000000000001"` denote the same price.
    pub fn from_strings(regime: PriceRegime, raw: &BTreeMap<String, String>) -> Result<Self> {
        let mut table = Self::new(regime);
        for (underlying, price) in raw {
            let value = if price.contains('.') {
                parse_ether(price)?
            } else {
                parse_raw(price)?
            };
            table.insert(underlying, value);
        }
        Ok(table)
    }

    pub fn regime(&self) -> PriceRegime {
        self.regime
    }

    pub fn insert(&mut self, underlying: &str, price: BigInt) {
        self.prices.insert(underlying.to_lowercase(), price);
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }

    pub fn price(&self, underlying: &str) -> Result<&BigInt> {
        self.prices
            .get(&underlying.to_lowercase())
            .ok_or_else(|| SettlementError::MissingPrice {
                regime: self.regime,
                underlying: underlying.to_string(),
            })
    }

    /// ETH value of `amount` units of `underlying`
    ///
    /// A zero amount is worth zero without consulting the table, so dust positions in
    /// unpriced markets do not abort a run.
    pub fn value_of(&self, amount: &BigInt, underlying: &str, decimals: u8) -> Result<BigInt> {
        if amount.is_zero() {
            return Ok(BigInt::zero());
        }
        Ok(to_eth(amount, self.price(underlying)?, decimals))
    }
}

/// Both price regimes used by a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prices {
    pub settlement: PriceTable,
    pub redemption: PriceTable,
}

impl Prices {
    pub fn new(settlement: PriceTable, redemption: PriceTable) -> Self {
        Self {
            settlement,
            redemption,
        }
    }

    pub fn table(&self, regime: PriceRegime) -> &PriceTable {
        match regime {
            PriceRegime::Settlement => &self.settlement,
            PriceRegime::Redemption => &self.redemption,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::one;

    const DAI: &str = "0x6B175474E89094C44Da98b954EedeAC495271d0F";

    fn table() -> PriceTable {
        let mut raw = BTreeMap::new();
        raw.insert(DAI.to_string(), "0.0005".to_string());
        raw.insert("0xabc".to_string(), "2000000000000000000".to_string());
        PriceTable::from_strings(PriceRegime::Settlement, &raw).unwrap()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let t = table();
        let expected = BigInt::from(500_000_000_000_000u64);
        assert_eq!(t.price(&DAI.to_lowercase()).unwrap(), &expected);
        assert_eq!(t.price(DAI).unwrap(), &expected);
        assert_eq!(t.price("0xABC").unwrap(), &(one() * 2));
    }

    #[test]
    fn test_value_of() {
        let t = table();
        // 2,000 DAI at 0.0005 = 1 ETH
        let amount = one() * 2000;
        assert_eq!(t.value_of(&amount, DAI, 18).unwrap(), one());
    }

    #[test]
    fn test_missing_price() {
        let t = table();
        let err = t.value_of(&BigInt::from(1), "0xdead", 18).unwrap_err();
        assert_eq!(
            err,
            SettlementError::MissingPrice {
                regime: PriceRegime::Settlement,
                underlying: "0xdead".to_string(),
            }
        );
    }

    #[test]
    fn test_zero_amount_needs_no_price() {
        let t = table();
        assert_eq!(t.value_of(&BigInt::zero(), "0xdead", 6).unwrap(), BigInt::zero());
    }

    #[test]
    fn test_malformed_price_rejected() {
        let mut raw = BTreeMap::new();
        raw.insert(DAI.to_string(), "lots".to_string());
        assert!(PriceTable::from_strings(PriceRegime::Redemption, &raw).is_err());
    }
}
