//! Replay of balance events recorded between the snapshot block and the freeze

use std::collections::BTreeMap;

use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SettlementError};
use crate::fixed::parse_units;
use crate::ledger::{Account, MarketPosition, SubAccountId};
use crate::prices::PriceTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventKind {
    Borrow,
    Repay,
    Withdraw,
}

/// One balance-changing event. `account` is the sub-account address, `amount` a decimal
/// string in whole tokens read at `decimals`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceEvent {
    pub event: EventKind,
    pub transaction_hash: String,
    pub account: String,
    pub underlying: String,
    #[serde(default)]
    pub symbol: String,
    pub decimals: u8,
    pub amount: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaySummary {
    pub applied: usize,
    /// Events for sub-accounts that are not in the ledger
    pub skipped: usize,
}

/// Apply `events` in order
///
/// - `Borrow` adds debt, opening the market if the sub-account never touched it
/// - `Repay` removes debt
/// - `Withdraw` removes deposit
///
/// Values of the touched market and the owning totals are recomputed after every event.
pub fn replay(
    accounts: &mut BTreeMap<String, Account>,
    events: &[BalanceEvent],
    prices: &PriceTable,
) -> Result<ReplaySummary> {
    let owners: BTreeMap<String, (String, SubAccountId)> = accounts
        .iter()
        .flat_map(|(primary, account)| {
            account
                .sub_accounts
                .iter()
                .map(move |(id, sub)| (sub.address.clone(), (primary.clone(), *id)))
        })
        .collect();

    let mut summary = ReplaySummary::default();
    for event in events {
        let address = event.account.to_lowercase();
        let underlying = event.underlying.to_lowercase();

        let Some((primary, id)) = owners.get(&address) else {
            warn!(
                "skipping {:?} {} for unknown sub-account {}",
                event.event, event.transaction_hash, address
            );
            summary.skipped += 1;
            continue;
        };
        let Some(account) = accounts.get_mut(primary) else {
            continue;
        };
        let Some(sub) = account.sub_accounts.get_mut(id) else {
            continue;
        };

        let amount = parse_units(&event.amount, event.decimals)?;
        let inconsistent = || SettlementError::InconsistentEvent {
            account: address.clone(),
            underlying: underlying.clone(),
            transaction: event.transaction_hash.clone(),
        };

        let market = match event.event {
            EventKind::Borrow => {
                if sub.market(&underlying).is_none() {
                    sub.markets
                        .push(MarketPosition::new(&underlying, &event.symbol, event.decimals));
                }
                let market = sub.market_mut(&underlying).ok_or_else(inconsistent)?;
                market.d_token_balance += &amount;
                market
            }
            EventKind::Repay => {
                let market = sub.market_mut(&underlying).ok_or_else(inconsistent)?;
                market.d_token_balance -= &amount;
                market
            }
            EventKind::Withdraw => {
                let market = sub.market_mut(&underlying).ok_or_else(inconsistent)?;
                market.e_token_balance_underlying -= &amount;
                market
            }
        };
        market.revalue(prices)?;

        debug!(
            "{:?} {} on {}/{}: {}",
            event.event, amount, primary, id, underlying
        );
        sub.refresh_total_value();
        account.refresh_total_value();
        summary.applied += 1;
    }

    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    fn event(kind: EventKind, account: &str, underlying: &str, amount: &str) -> BalanceEvent {
        BalanceEvent {
            event: kind,
            transaction_hash: "0xfeed".to_string(),
            account: account.to_string(),
            underlying: underlying.to_string(),
            symbol: "TKN".to_string(),
            decimals: 18,
            amount: amount.to_string(),
        }
    }

    fn accounts() -> BTreeMap<String, Account> {
        let prices = flat_prices(&[(TKN, "1"), (TKN2, "2")]);
        valued_ledger(vec![(ADDR_A, account(&[(0, vec![market(TKN, "10", "2")])]))], &prices)
            .accounts
    }

    // sub-account 0 of every test account uses address 0x00..00
    const SUB0: &str = "0x0000000000000000000000000000000000000000";

    #[test]
    fn test_replay_updates_balances_and_values() {
        let prices = price_table(&[(TKN, "1"), (TKN2, "2")]);
        let mut accts = accounts();

        let events = vec![
            event(EventKind::Withdraw, SUB0, TKN, "3"),
            event(EventKind::Repay, SUB0, TKN, "1"),
            event(EventKind::Borrow, SUB0, TKN2, "1"),
        ];
        let summary = replay(&mut accts, &events, &prices).unwrap();
        assert_eq!(summary, ReplaySummary { applied: 3, skipped: 0 });

        let sub = &accts[ADDR_A].sub_accounts[&0];
        let tkn = sub.market(TKN).unwrap();
        assert_eq!(tkn.e_token_balance_underlying, ether("7"));
        assert_eq!(tkn.d_token_balance, ether("1"));
        assert_eq!(tkn.total_value, ether("6"));

        let tkn2 = sub.market(TKN2).unwrap();
        assert_eq!(tkn2.d_token_balance, ether("1"));
        assert_eq!(tkn2.total_value, ether("-2"));

        assert_eq!(sub.total_value, ether("4"));
        assert_eq!(accts[ADDR_A].sub_accounts_total_value, ether("4"));
    }

    #[test]
    fn test_repay_on_unknown_market_is_inconsistent() {
        let prices = price_table(&[(TKN, "1")]);
        let mut accts = accounts();

        let err = replay(&mut accts, &[event(EventKind::Repay, SUB0, TKN2, "1")], &prices)
            .unwrap_err();
        assert!(matches!(err, SettlementError::InconsistentEvent { .. }));
    }

    #[test]
    fn test_withdraw_on_unknown_market_is_inconsistent() {
        let prices = price_table(&[(TKN, "1"), (TKN2, "2")]);
        let mut accts = accounts();

        let err = replay(&mut accts, &[event(EventKind::Withdraw, SUB0, TKN2, "0.5")], &prices)
            .unwrap_err();
        assert_eq!(
            err,
            SettlementError::InconsistentEvent {
                account: SUB0.to_string(),
                underlying: TKN2.to_string(),
                transaction: "0xfeed".to_string(),
            }
        );
    }

    #[test]
    fn test_unknown_sub_account_is_skipped() {
        let prices = price_table(&[(TKN, "1")]);
        let mut accts = accounts();
        let before = accts.clone();

        let summary = replay(
            &mut accts,
            &[event(EventKind::Withdraw, ADDR_C, TKN, "1")],
            &prices,
        )
        .unwrap();

        assert_eq!(summary, ReplaySummary { applied: 0, skipped: 1 });
        assert_eq!(accts, before);
    }

    #[test]
    fn test_event_addresses_are_case_insensitive() {
        let prices = price_table(&[(TKN, "1")]);
        let mut accts = accounts();

        let mut e = event(EventKind::Withdraw, SUB0, &TKN.to_uppercase().replace("0X", "0x"), "1");
        e.account = SUB0.to_uppercase().replace("0X", "0x");
        replay(&mut accts, &[e], &prices).unwrap();

        let tkn = accts[ADDR_A].sub_accounts[&0].market(TKN).unwrap();
        assert_eq!(tkn.e_token_balance_underlying, ether("9"));
    }
}
