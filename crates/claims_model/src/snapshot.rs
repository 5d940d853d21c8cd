//! Balance snapshot input and ledger construction

use std::collections::{BTreeMap, BTreeSet};

use log::{debug, info};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::events::{self, BalanceEvent};
use crate::fixed::parse_units;
use crate::ledger::{Account, Ledger, MarketPosition, SubAccount, SubAccountId};
use crate::prices::PriceTable;

/// Market balances as exported by the indexer
///
/// Amounts are decimal strings in whole tokens, read at the market's `decimals`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSnapshot {
    pub underlying: String,
    pub symbol: String,
    pub decimals: u8,
    pub e_token_balance_underlying: String,
    pub d_token_balance: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staked_e_token_balance_underlying: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAccountSnapshot {
    pub address: String,
    #[serde(default)]
    pub markets: Vec<MarketSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountSnapshot {
    #[serde(default)]
    pub is_reserves: bool,
    pub sub_accounts: BTreeMap<SubAccountId, SubAccountSnapshot>,
}

/// Primary address -> account balances
pub type BalancesSnapshot = BTreeMap<String, AccountSnapshot>;

/// Everything needed to build the initial ledger
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub users: BalancesSnapshot,
    /// Synthetic per-market reserve accounts
    pub reserves: BalancesSnapshot,
    pub events: Vec<BalanceEvent>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Primary accounts left out of the settlement entirely
    pub excluded_accounts: BTreeSet<String>,
}

impl SnapshotOptions {
    pub fn new<I, S>(excluded: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            excluded_accounts: excluded.into_iter().map(|s| s.as_ref().to_lowercase()).collect(),
        }
    }
}

impl MarketSnapshot {
    fn to_position(&self, prices: &PriceTable) -> Result<MarketPosition> {
        let mut m = MarketPosition::new(&self.underlying, &self.symbol, self.decimals);
        m.e_token_balance_underlying = parse_units(&self.e_token_balance_underlying, self.decimals)?;
        m.d_token_balance = parse_units(&self.d_token_balance, self.decimals)?;
        m.staked_e_token_balance_underlying = match &self.staked_e_token_balance_underlying {
            Some(s) => parse_units(s, self.decimals)?,
            None => BigInt::zero(),
        };
        m.revalue(prices)?;
        Ok(m)
    }
}

fn build_sub_account(snapshot: &SubAccountSnapshot, prices: &PriceTable) -> Result<SubAccount> {
    let mut sub = SubAccount::new(&snapshot.address);

    for market in &snapshot.markets {
        let position = market.to_position(prices)?;
        // duplicate rows for one underlying are merged
        match sub.market_mut(&position.underlying) {
            Some(existing) => {
                existing.e_token_balance_underlying += &position.e_token_balance_underlying;
                existing.d_token_balance += &position.d_token_balance;
                existing.staked_e_token_balance_underlying +=
                    &position.staked_e_token_balance_underlying;
                existing.revalue(prices)?;
            }
            None => sub.markets.push(position),
        }
    }

    sub.refresh_total_value();
    Ok(sub)
}

fn build_account(snapshot: &AccountSnapshot, is_reserves: bool, prices: &PriceTable) -> Result<Account> {
    let mut account = Account::new(is_reserves);
    for (id, sub) in &snapshot.sub_accounts {
        account.sub_accounts.insert(*id, build_sub_account(sub, prices)?);
    }
    account.refresh_total_value();
    Ok(account)
}

impl Ledger {
    /// Build the `Snapshot` stage ledger
    ///
    /// 1. user accounts not on the exclusion list are valued at settlement prices
    /// 2. balance events are replayed
    /// 3. accounts whose total value is not positive are dropped
    /// 4. reserve accounts are added
    pub fn from_snapshot(
        snapshot: &Snapshot,
        prices: &PriceTable,
        options: &SnapshotOptions,
    ) -> Result<Ledger> {
        let mut accounts: BTreeMap<String, Account> = BTreeMap::new();
        let mut excluded = 0usize;

        for (address, account) in &snapshot.users {
            let address = address.to_lowercase();
            if options.excluded_accounts.contains(&address) {
                excluded += 1;
                continue;
            }
            accounts.insert(address, build_account(account, false, prices)?);
        }

        let replayed = events::replay(&mut accounts, &snapshot.events, prices)?;

        let before = accounts.len();
        accounts.retain(|address, account| {
            let keep = account.sub_accounts_total_value.is_positive();
            if !keep {
                debug!("dropping {} with total value {}", address, account.sub_accounts_total_value);
            }
            keep
        });
        let dropped = before - accounts.len();

        for (address, account) in &snapshot.reserves {
            accounts.insert(address.to_lowercase(), build_account(account, true, prices)?);
        }

        info!(
            "snapshot: {} accounts ({} reserves), {} events applied, {} skipped, {} excluded, {} without value",
            accounts.len(),
            snapshot.reserves.len(),
            replayed.applied,
            replayed.skipped,
            excluded,
            dropped
        );

        Ok(Ledger {
            accounts,
            ..Ledger::new()
        })
    }
}
