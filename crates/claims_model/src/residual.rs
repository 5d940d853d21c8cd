//! Residual pool allocation
//!
//! Token balances salvaged per market are shared among that market's net depositors
//! (deposit minus debt, when positive). A pool larger than total net deposits only pays
//! out up to those deposits.

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fixed::{mul_div, one, parse_units};
use crate::ledger::{Ledger, RemainingClaim, Stage};
use crate::prices::Prices;

/// Residual balance of one market as exported by the indexer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResidualEntry {
    pub underlying: String,
    pub symbol: String,
    pub decimals: u8,
    /// Decimal string in whole tokens
    pub balance: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResidualPool {
    pub symbol: String,
    pub decimals: u8,
    pub available: BigInt,
}

/// Underlying -> salvaged balance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResidualPools {
    pools: BTreeMap<String, ResidualPool>,
}

impl ResidualPools {
    /// Zero balances and symbols in `excluded_symbols` are ignored
    pub fn from_entries(entries: &[ResidualEntry], excluded_symbols: &BTreeSet<String>) -> Result<Self> {
        let mut pools = Self::default();
        for entry in entries {
            if excluded_symbols.contains(&entry.symbol) {
                debug!("residual {} folded into the main distribution", entry.symbol);
                continue;
            }
            let available = parse_units(&entry.balance, entry.decimals)?;
            if !available.is_positive() {
                continue;
            }
            pools.insert(&entry.underlying, &entry.symbol, entry.decimals, available);
        }
        Ok(pools)
    }

    pub fn insert(&mut self, underlying: &str, symbol: &str, decimals: u8, available: BigInt) {
        self.pools.insert(
            underlying.to_lowercase(),
            ResidualPool {
                symbol: symbol.to_string(),
                decimals,
                available,
            },
        );
    }

    pub fn get(&self, underlying: &str) -> Option<&ResidualPool> {
        self.pools.get(underlying)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &ResidualPool)> {
        self.pools.iter()
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// Net deposits per underlying: `(users, reserves)`
type Dilution = (BTreeMap<String, BigInt>, BTreeMap<String, BigInt>);

fn net_deposits(ledger: &Ledger) -> Dilution {
    let mut users: BTreeMap<String, BigInt> = BTreeMap::new();
    let mut reserves: BTreeMap<String, BigInt> = BTreeMap::new();

    ledger.for_each_market(|m, owner| {
        let deposit = m.net_balance();
        if !deposit.is_positive() {
            return;
        }
        let totals = if owner.is_reserves { &mut reserves } else { &mut users };
        *totals.entry(m.underlying.clone()).or_insert_with(BigInt::zero) += deposit;
    });

    (users, reserves)
}

/// Grant every net depositor its share of the matching residual pool
///
/// Users are diluted against user deposits only. A reserve account gets a virtual claim
/// computed against user deposits plus its own, so user claims sum to at most the pool.
pub fn allocate(mut ledger: Ledger, pools: &ResidualPools, prices: &Prices) -> Result<Ledger> {
    ledger.expect_stage("residual allocation", Stage::Snapshot)?;

    let (user_deposits, reserve_deposits) = net_deposits(&ledger);
    let one = one();

    for (underlying, pool) in pools.iter() {
        let total = user_deposits.get(underlying).cloned().unwrap_or_default();
        info!(
            "residual {}: available {}, user net deposits {}",
            pool.symbol, pool.available, total
        );
    }

    ledger.try_for_each_sub_account_mut(|sub, owner| -> Result<()> {
        for m in &sub.markets {
            let Some(pool) = pools.get(&m.underlying) else {
                continue;
            };
            let deposit = m.net_balance();
            if !deposit.is_positive() {
                continue;
            }

            let mut total = user_deposits.get(&m.underlying).cloned().unwrap_or_default();
            if owner.is_reserves {
                if let Some(own) = reserve_deposits.get(&m.underlying) {
                    total += own;
                }
            }

            let available = if pool.available < total {
                pool.available.clone()
            } else {
                total.clone()
            };
            let claim_amount = mul_div(&deposit, &available, &total);
            let claim_value = prices
                .settlement
                .value_of(&claim_amount, &m.underlying, m.decimals)?;
            let claim_value_at_redemption = prices
                .redemption
                .value_of(&claim_amount, &m.underlying, m.decimals)?;

            sub.claims.total_remaining_claims_value += &claim_value;
            sub.claims.total_remaining_claims_value_at_redemption += &claim_value_at_redemption;
            sub.claims.remaining.insert(
                m.underlying.clone(),
                RemainingClaim {
                    symbol: m.symbol.clone(),
                    decimals: m.decimals,
                    percentage: mul_div(&deposit, &one, &total),
                    deposits: deposit,
                    total_deposits: total,
                    total_available: available,
                    claim_amount,
                    claim_value,
                    claim_value_at_redemption,
                },
            );
        }
        Ok(())
    })?;

    ledger.rebuild_account_totals();
    ledger.stage = Stage::RemainingAllocated;
    Ok(ledger)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SettlementError;
    use crate::ledger::Account;
    use crate::testing::*;

    fn pools(available: &str) -> ResidualPools {
        let mut p = ResidualPools::default();
        p.insert(TKN, "TKN", 18, ether(available));
        p
    }

    fn three_depositors(prices: &Prices) -> Ledger {
        valued_ledger(
            vec![
                (ADDR_A, account(&[(0, vec![market(TKN, "100", "0")])])),
                (ADDR_B, account(&[(0, vec![market(TKN, "200", "0")])])),
                (ADDR_C, account(&[(0, vec![market(TKN, "300", "0")])])),
            ],
            prices,
        )
    }

    fn claim(ledger: &Ledger, address: &str) -> BigInt {
        ledger.accounts[address].claims.remaining[TKN].claim_amount.clone()
    }

    #[test]
    fn test_pro_rata_split() {
        let prices = flat_prices(&[(TKN, "1")]);
        let ledger = allocate(three_depositors(&prices), &pools("60"), &prices).unwrap();

        assert_eq!(ledger.stage, Stage::RemainingAllocated);
        assert_eq!(claim(&ledger, ADDR_A), ether("10"));
        assert_eq!(claim(&ledger, ADDR_B), ether("20"));
        assert_eq!(claim(&ledger, ADDR_C), ether("30"));

        let rc = &ledger.accounts[ADDR_A].sub_accounts[&0].claims.remaining[TKN];
        assert_eq!(rc.total_deposits, ether("600"));
        assert_eq!(rc.percentage, one() / 6);
        assert_eq!(rc.claim_value, ether("10"));
    }

    #[test]
    fn test_odd_pool_truncates() {
        let prices = flat_prices(&[(TKN, "1")]);
        let mut ledger = three_depositors(&prices);
        // amounts in raw units: 100 / 200 / 300 with 61 available
        for (_, acct) in ledger.accounts.iter_mut() {
            let m = &mut acct.sub_accounts.get_mut(&0).unwrap().markets[0];
            m.e_token_balance_underlying /= one();
        }
        let mut p = ResidualPools::default();
        p.insert(TKN, "TKN", 18, BigInt::from(61));

        let ledger = allocate(ledger, &p, &prices).unwrap();
        assert_eq!(claim(&ledger, ADDR_A), BigInt::from(10));
        assert_eq!(claim(&ledger, ADDR_B), BigInt::from(20));
        assert_eq!(claim(&ledger, ADDR_C), BigInt::from(30));
    }

    #[test]
    fn test_pool_larger_than_deposits_is_capped() {
        let prices = flat_prices(&[(TKN, "1")]);
        let ledger = allocate(three_depositors(&prices), &pools("1000"), &prices).unwrap();

        assert_eq!(claim(&ledger, ADDR_A), ether("100"));
        assert_eq!(claim(&ledger, ADDR_C), ether("300"));
        let rc = &ledger.accounts[ADDR_A].sub_accounts[&0].claims.remaining[TKN];
        assert_eq!(rc.total_available, ether("600"));
    }

    #[test]
    fn test_debt_reduces_dilution_weight() {
        let prices = flat_prices(&[(TKN, "1")]);
        let ledger = valued_ledger(
            vec![
                (ADDR_A, account(&[(0, vec![market(TKN, "100", "50")])])),
                (ADDR_B, account(&[(0, vec![market(TKN, "50", "0")])])),
                // net borrower gets nothing
                (ADDR_C, account(&[(0, vec![market(TKN, "10", "20"), market(TKN2, "100", "0")])])),
            ],
            &flat_prices(&[(TKN, "1"), (TKN2, "1")]),
        );

        let ledger = allocate(ledger, &pools("10"), &prices).unwrap();
        assert_eq!(claim(&ledger, ADDR_A), ether("5"));
        assert_eq!(claim(&ledger, ADDR_B), ether("5"));
        assert!(ledger.accounts[ADDR_C].claims.remaining.is_empty());
    }

    #[test]
    fn test_reserve_claim_does_not_dilute_users() {
        let prices = flat_prices(&[(TKN, "1")]);
        let mut reserve = account(&[(0, vec![market(TKN, "100", "0")])]);
        reserve.is_reserves = true;
        let ledger = valued_ledger(
            vec![
                (ADDR_A, account(&[(0, vec![market(TKN, "100", "0")])])),
                (ADDR_B, account(&[(0, vec![market(TKN, "100", "0")])])),
                ("reservetkn", reserve),
            ],
            &prices,
        );

        let ledger = allocate(ledger, &pools("100"), &prices).unwrap();
        assert_eq!(claim(&ledger, ADDR_A), ether("50"));
        assert_eq!(claim(&ledger, ADDR_B), ether("50"));

        // virtual claim against 300 total
        let reserve_claim = &ledger.accounts["reservetkn"].claims.remaining[TKN];
        assert_eq!(reserve_claim.claim_amount, ether("100") * ether("100") / ether("300"));
    }

    #[test]
    fn test_excluded_and_empty_entries_ignored() {
        let entries = vec![
            ResidualEntry {
                underlying: TKN.to_uppercase().replace("0X", "0x"),
                symbol: "TKN".to_string(),
                decimals: 18,
                balance: "6.0".to_string(),
            },
            ResidualEntry {
                underlying: TKN2.to_string(),
                symbol: "WETH".to_string(),
                decimals: 18,
                balance: "5".to_string(),
            },
            ResidualEntry {
                underlying: ADDR_C.to_string(),
                symbol: "ZERO".to_string(),
                decimals: 18,
                balance: "0.0".to_string(),
            },
        ];
        let excluded: BTreeSet<String> = ["WETH".to_string()].into_iter().collect();

        let p = ResidualPools::from_entries(&entries, &excluded).unwrap();
        assert_eq!(p.len(), 1);
        assert_eq!(p.get(TKN).unwrap().available, ether("6"));
    }

    #[test]
    fn test_remaining_values_use_both_regimes() {
        let mut prices = flat_prices(&[(TKN, "1")]);
        prices.redemption.insert(TKN, ether("2"));
        let ledger = allocate(three_depositors(&prices), &pools("60"), &prices).unwrap();

        let a: &Account = &ledger.accounts[ADDR_A];
        assert_eq!(a.claims.total_remaining_claims_value, ether("10"));
        assert_eq!(a.claims.total_remaining_claims_value_at_redemption, ether("20"));
    }

    #[test]
    fn test_rejects_wrong_stage() {
        let prices = flat_prices(&[(TKN, "1")]);
        let mut ledger = three_depositors(&prices);
        ledger.stage = Stage::NavComputed;

        let err = allocate(ledger, &pools("60"), &prices).unwrap_err();
        assert!(matches!(err, SettlementError::StageOrder { .. }));
    }
}
