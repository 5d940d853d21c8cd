//! Builders shared by unit tests

use std::collections::BTreeMap;

use num_bigint::BigInt;

use crate::fixed::parse_ether;
use crate::ledger::*;
use crate::prices::{PriceRegime, PriceTable, Prices};

pub const ADDR_A: &str = "0x00000000000000000000000000000000000000a0";
pub const ADDR_B: &str = "0x00000000000000000000000000000000000000b0";
pub const ADDR_C: &str = "0x00000000000000000000000000000000000000c0";
pub const TKN: &str = "0x1000000000000000000000000000000000000001";
pub const TKN2: &str = "0x2000000000000000000000000000000000000002";

pub fn ether(s: &str) -> BigInt {
    parse_ether(s).unwrap()
}

/// 18 decimal market with deposit and debt in whole tokens
pub fn market(underlying: &str, deposit: &str, debt: &str) -> MarketPosition {
    let mut m = MarketPosition::new(underlying, "TKN", 18);
    m.e_token_balance_underlying = ether(deposit);
    m.d_token_balance = ether(debt);
    m
}

pub fn sub_account(id: SubAccountId, markets: Vec<MarketPosition>) -> SubAccount {
    let mut sub = SubAccount::new(&format!("0x{:040x}", id));
    sub.markets = markets;
    sub
}

pub fn account(subs: &[(SubAccountId, Vec<MarketPosition>)]) -> Account {
    let mut acct = Account::new(false);
    for (id, markets) in subs {
        acct.sub_accounts.insert(*id, sub_account(*id, markets.clone()));
    }
    acct
}

pub fn price_table(entries: &[(&str, &str)]) -> PriceTable {
    let raw: BTreeMap<String, String> = entries
        .iter()
        .map(|(u, p)| (u.to_string(), p.to_string()))
        .collect();
    PriceTable::from_strings(PriceRegime::Settlement, &raw).unwrap()
}

/// Same prices in both regimes
pub fn flat_prices(entries: &[(&str, &str)]) -> Prices {
    let raw: BTreeMap<String, String> = entries
        .iter()
        .map(|(u, p)| (u.to_string(), p.to_string()))
        .collect();
    Prices::new(
        PriceTable::from_strings(PriceRegime::Settlement, &raw).unwrap(),
        PriceTable::from_strings(PriceRegime::Redemption, &raw).unwrap(),
    )
}

pub fn remaining_claim(amount: u64) -> RemainingClaim {
    RemainingClaim {
        symbol: "TKN".to_string(),
        decimals: 18,
        deposits: BigInt::from(amount),
        total_deposits: BigInt::from(amount),
        total_available: BigInt::from(amount),
        percentage: BigInt::from(amount),
        claim_amount: BigInt::from(amount),
        claim_value: BigInt::from(amount),
        claim_value_at_redemption: BigInt::from(amount),
    }
}

/// Ledger with every market valued at settlement prices
pub fn valued_ledger(accounts: Vec<(&str, Account)>, prices: &Prices) -> Ledger {
    let mut ledger = Ledger::new();
    for (address, mut acct) in accounts {
        for sub in acct.sub_accounts.values_mut() {
            for m in sub.markets.iter_mut() {
                m.revalue(&prices.settlement).unwrap();
            }
            sub.refresh_total_value();
        }
        acct.refresh_total_value();
        ledger.accounts.insert(address.to_string(), acct);
    }
    ledger
}
