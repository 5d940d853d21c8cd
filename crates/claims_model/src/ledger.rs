//! Account ledger: primary accounts, sub-accounts, market positions and claim records
//!
//! The ledger is the single source of truth threaded through every settlement pass.
//! Ordering is deterministic everywhere: accounts by address, sub-accounts by id,
//! per-underlying maps by underlying address.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::{AddAssign, Sub};

use num_bigint::BigInt;
use num_traits::Zero;
use serde::{Deserialize, Serialize};

use crate::error::{DataAnomaly, Result, SettlementError};
use crate::fixed::{mul_div, raw};
use crate::prices::PriceTable;

/// Sub-account id, 0..=255 under each primary account
pub type SubAccountId = u8;

/// Progress of a ledger through the settlement passes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Snapshot,
    RemainingAllocated,
    NavComputed,
    ProRataAllocated,
    ReservesRedistributed,
    Capped,
    Settled,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Snapshot,
        Stage::RemainingAllocated,
        Stage::NavComputed,
        Stage::ProRataAllocated,
        Stage::ReservesRedistributed,
        Stage::Capped,
        Stage::Settled,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn next(self) -> Option<Stage> {
        Self::ALL.get(self.index() + 1).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Stage::Snapshot => "snapshot",
            Stage::RemainingAllocated => "remaining-allocated",
            Stage::NavComputed => "nav-computed",
            Stage::ProRataAllocated => "pro-rata-allocated",
            Stage::ReservesRedistributed => "reserves-redistributed",
            Stage::Capped => "capped",
            Stage::Settled => "settled",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Amounts of the three recovered assets, each in its smallest unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmounts {
    #[serde(with = "raw")]
    pub eth: BigInt,
    #[serde(with = "raw")]
    pub dai: BigInt,
    #[serde(with = "raw")]
    pub usdc: BigInt,
}

impl AssetAmounts {
    pub fn new(eth: BigInt, dai: BigInt, usdc: BigInt) -> Self {
        Self { eth, dai, usdc }
    }

    pub fn is_zero(&self) -> bool {
        self.eth.is_zero() && self.dai.is_zero() && self.usdc.is_zero()
    }

    /// Each component scaled by `num / den`, truncating
    pub fn mul_div(&self, num: &BigInt, den: &BigInt) -> Self {
        Self {
            eth: mul_div(&self.eth, num, den),
            dai: mul_div(&self.dai, num, den),
            usdc: mul_div(&self.usdc, num, den),
        }
    }
}

impl AddAssign<&AssetAmounts> for AssetAmounts {
    fn add_assign(&mut self, rhs: &AssetAmounts) {
        self.eth += &rhs.eth;
        self.dai += &rhs.dai;
        self.usdc += &rhs.usdc;
    }
}

impl Sub for &AssetAmounts {
    type Output = AssetAmounts;

    fn sub(self, rhs: &AssetAmounts) -> AssetAmounts {
        AssetAmounts {
            eth: &self.eth - &rhs.eth,
            dai: &self.dai - &rhs.dai,
            usdc: &self.usdc - &rhs.usdc,
        }
    }
}

/// One market held by a sub-account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPosition {
    pub underlying: String,
    pub symbol: String,
    pub decimals: u8,
    #[serde(with = "raw")]
    pub e_token_balance_underlying: BigInt,
    #[serde(with = "raw")]
    pub d_token_balance: BigInt,
    #[serde(with = "raw")]
    pub staked_e_token_balance_underlying: BigInt,
    /// Settlement-priced value of deposits (including staked)
    #[serde(with = "raw")]
    pub deposit_value_in_eth: BigInt,
    #[serde(with = "raw")]
    pub borrow_value_in_eth: BigInt,
    /// `deposit_value_in_eth - borrow_value_in_eth`
    #[serde(with = "raw")]
    pub total_value: BigInt,
}

impl MarketPosition {
    pub fn new(underlying: &str, symbol: &str, decimals: u8) -> Self {
        Self {
            underlying: underlying.to_lowercase(),
            symbol: symbol.to_string(),
            decimals,
            e_token_balance_underlying: BigInt::zero(),
            d_token_balance: BigInt::zero(),
            staked_e_token_balance_underlying: BigInt::zero(),
            deposit_value_in_eth: BigInt::zero(),
            borrow_value_in_eth: BigInt::zero(),
            total_value: BigInt::zero(),
        }
    }

    /// Deposit balance including staked eTokens
    pub fn deposit_amount(&self) -> BigInt {
        &self.e_token_balance_underlying + &self.staked_e_token_balance_underlying
    }

    /// Deposits net of debt in this market, used for residual dilution
    pub fn net_balance(&self) -> BigInt {
        &self.e_token_balance_underlying - &self.d_token_balance
    }

    /// Recompute value fields from balances
    pub fn revalue(&mut self, prices: &PriceTable) -> Result<()> {
        self.deposit_value_in_eth =
            prices.value_of(&self.deposit_amount(), &self.underlying, self.decimals)?;
        self.borrow_value_in_eth =
            prices.value_of(&self.d_token_balance, &self.underlying, self.decimals)?;
        self.total_value = &self.deposit_value_in_eth - &self.borrow_value_in_eth;
        Ok(())
    }
}

/// Share of a residual pool granted to one sub-account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingClaim {
    pub symbol: String,
    pub decimals: u8,
    #[serde(with = "raw")]
    pub deposits: BigInt,
    #[serde(with = "raw")]
    pub total_deposits: BigInt,
    #[serde(with = "raw")]
    pub total_available: BigInt,
    /// `deposits * ONE / total_deposits`
    #[serde(with = "raw")]
    pub percentage: BigInt,
    #[serde(with = "raw")]
    pub claim_amount: BigInt,
    #[serde(with = "raw")]
    pub claim_value: BigInt,
    #[serde(with = "raw")]
    pub claim_value_at_redemption: BigInt,
}

/// Per-underlying deposit after debt and remaining claims are netted out
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetDeposit {
    pub symbol: String,
    pub decimals: u8,
    #[serde(with = "raw")]
    pub deposit_amount: BigInt,
    #[serde(with = "raw")]
    pub net_deposit_amount: BigInt,
    #[serde(with = "raw")]
    pub net_deposit_amount_redemption: BigInt,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserve_claims: Option<AssetAmounts>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "raw::option")]
    pub reserve_percentage: Option<BigInt>,
}

impl NetDeposit {
    pub fn new(symbol: &str, decimals: u8) -> Self {
        Self {
            symbol: symbol.to_string(),
            decimals,
            deposit_amount: BigInt::zero(),
            net_deposit_amount: BigInt::zero(),
            net_deposit_amount_redemption: BigInt::zero(),
            reserve_claims: None,
            reserve_percentage: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deposits {
    #[serde(with = "raw")]
    pub total_deposits_value: BigInt,
    #[serde(with = "raw")]
    pub total_debt_value: BigInt,
    #[serde(with = "raw")]
    pub total_deposits_value_redemption: BigInt,
    #[serde(with = "raw")]
    pub total_debt_value_redemption: BigInt,
    /// Keyed by underlying
    pub deposits: BTreeMap<String, NetDeposit>,
}

/// Claim records of one sub-account, filled in pass by pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAccountClaims {
    /// Keyed by underlying
    pub remaining: BTreeMap<String, RemainingClaim>,
    #[serde(with = "raw")]
    pub total_remaining_claims_value: BigInt,
    #[serde(with = "raw")]
    pub total_remaining_claims_value_at_redemption: BigInt,

    /// `currentNAV * ONE / totalCurrentNAV`
    #[serde(with = "raw")]
    pub nav_share: BigInt,
    /// Current returned-asset claim
    pub returned: AssetAmounts,
    /// Pro-rata claim before reserve redistribution
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_nav: Option<AssetAmounts>,
    /// Share of reserve claims received
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserves: Option<AssetAmounts>,
    /// Claim before the cap, only set when the cap applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_pre_cap: Option<AssetAmounts>,
    /// Claim before surplus redistribution, only set for recipients
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_pre_foregone_profit: Option<AssetAmounts>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub returned_surplus: Option<AssetAmounts>,
    #[serde(with = "raw")]
    pub returned_value_at_redemption: BigInt,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "raw::option")]
    pub claims_to_nav: Option<BigInt>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAccount {
    pub address: String,
    pub markets: Vec<MarketPosition>,
    #[serde(with = "raw")]
    pub total_value: BigInt,
    #[serde(default)]
    pub deposits: Deposits,
    #[serde(rename = "currentNAV", with = "raw")]
    pub current_nav: BigInt,
    #[serde(rename = "currentNAVRedemption", with = "raw")]
    pub current_nav_redemption: BigInt,
    #[serde(with = "raw")]
    pub foregone_profit: BigInt,
    #[serde(default)]
    pub claims: SubAccountClaims,
}

impl SubAccount {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_lowercase(),
            markets: Vec::new(),
            total_value: BigInt::zero(),
            deposits: Deposits::default(),
            current_nav: BigInt::zero(),
            current_nav_redemption: BigInt::zero(),
            foregone_profit: BigInt::zero(),
            claims: SubAccountClaims::default(),
        }
    }

    pub fn market(&self, underlying: &str) -> Option<&MarketPosition> {
        self.markets.iter().find(|m| m.underlying == underlying)
    }

    pub fn market_mut(&mut self, underlying: &str) -> Option<&mut MarketPosition> {
        self.markets.iter_mut().find(|m| m.underlying == underlying)
    }

    pub fn refresh_total_value(&mut self) {
        self.total_value = self.markets.iter().map(|m| &m.total_value).sum();
    }
}

/// Remaining claims of all sub-accounts of one primary account, per underlying
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountRemaining {
    pub symbol: String,
    pub decimals: u8,
    #[serde(with = "raw")]
    pub claim_amount: BigInt,
    #[serde(with = "raw")]
    pub claim_value: BigInt,
    #[serde(with = "raw")]
    pub claim_value_at_redemption: BigInt,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountClaims {
    pub remaining: BTreeMap<String, AccountRemaining>,
    #[serde(with = "raw")]
    pub total_remaining_claims_value: BigInt,
    #[serde(with = "raw")]
    pub total_remaining_claims_value_at_redemption: BigInt,
    pub returned: AssetAmounts,
    #[serde(with = "raw")]
    pub dai_claim_value: BigInt,
    #[serde(with = "raw")]
    pub usdc_claim_value: BigInt,
    #[serde(with = "raw")]
    pub total_returned_claims_value_at_redemption: BigInt,
}

/// Primary account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    #[serde(default)]
    pub is_reserves: bool,
    pub sub_accounts: BTreeMap<SubAccountId, SubAccount>,
    #[serde(with = "raw")]
    pub sub_accounts_total_value: BigInt,
    #[serde(rename = "currentNAV", with = "raw")]
    pub current_nav: BigInt,
    #[serde(with = "raw")]
    pub foregone_profit: BigInt,
    #[serde(default)]
    pub claims: AccountClaims,
}

impl Account {
    pub fn new(is_reserves: bool) -> Self {
        Self {
            is_reserves,
            sub_accounts: BTreeMap::new(),
            sub_accounts_total_value: BigInt::zero(),
            current_nav: BigInt::zero(),
            foregone_profit: BigInt::zero(),
            claims: AccountClaims::default(),
        }
    }

    pub fn refresh_total_value(&mut self) {
        self.sub_accounts_total_value = self.sub_accounts.values().map(|s| &s.total_value).sum();
    }

    /// Market a reserve account stands for: its first market
    pub fn reserve_market(&self) -> Option<&MarketPosition> {
        self.sub_accounts.values().flat_map(|s| s.markets.iter()).next()
    }
}

/// Run-wide aggregates
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementTotals {
    #[serde(rename = "totalCurrentNAV", with = "raw")]
    pub total_current_nav: BigInt,
    #[serde(with = "raw")]
    pub total_foregone_profit: BigInt,
    /// Amount clawed back by the cap
    pub surplus: AssetAmounts,
    /// Reserve claims with no net user deposits to land on, keyed by underlying
    pub undistributed: BTreeMap<String, AssetAmounts>,
    /// Surplus not handed out by the foregone profit pass
    pub undistributed_surplus: AssetAmounts,
}

/// Who owns the record a traversal callback is looking at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner<'a> {
    pub primary: &'a str,
    pub sub_account: SubAccountId,
    pub is_reserves: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ledger {
    pub stage: Stage,
    pub accounts: BTreeMap<String, Account>,
    #[serde(default)]
    pub totals: SettlementTotals,
    #[serde(default)]
    pub anomalies: Vec<DataAnomaly>,
}

impl Default for Ledger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger {
    pub fn new() -> Self {
        Self {
            stage: Stage::Snapshot,
            accounts: BTreeMap::new(),
            totals: SettlementTotals::default(),
            anomalies: Vec::new(),
        }
    }

    /// Fail unless the ledger sits at `expected`
    pub fn expect_stage(&self, pass: &'static str, expected: Stage) -> Result<()> {
        if self.stage != expected {
            return Err(SettlementError::StageOrder {
                pass,
                expected,
                found: self.stage,
            });
        }
        Ok(())
    }

    pub fn user_accounts(&self) -> impl Iterator<Item = (&String, &Account)> {
        self.accounts.iter().filter(|(_, a)| !a.is_reserves)
    }

    pub fn reserve_accounts(&self) -> impl Iterator<Item = (&String, &Account)> {
        self.accounts.iter().filter(|(_, a)| a.is_reserves)
    }

    pub fn sub_account_count(&self) -> usize {
        self.accounts.values().map(|a| a.sub_accounts.len()).sum()
    }

    pub fn for_each_sub_account<F>(&self, mut visit: F)
    where
        F: FnMut(&SubAccount, Owner<'_>),
    {
        for (primary, account) in &self.accounts {
            for (id, sub) in &account.sub_accounts {
                visit(
                    sub,
                    Owner {
                        primary,
                        sub_account: *id,
                        is_reserves: account.is_reserves,
                    },
                );
            }
        }
    }

    pub fn for_each_market<F>(&self, mut visit: F)
    where
        F: FnMut(&MarketPosition, Owner<'_>),
    {
        self.for_each_sub_account(|sub, owner| {
            for market in &sub.markets {
                visit(market, owner);
            }
        });
    }

    /// Visits `(underlying, net deposit)` pairs
    pub fn for_each_net_deposit<F>(&self, mut visit: F)
    where
        F: FnMut(&str, &NetDeposit, Owner<'_>),
    {
        self.for_each_sub_account(|sub, owner| {
            for (underlying, deposit) in &sub.deposits.deposits {
                visit(underlying.as_str(), deposit, owner);
            }
        });
    }

    pub fn try_for_each_sub_account_mut<F, E>(&mut self, mut visit: F) -> Result<(), E>
    where
        F: FnMut(&mut SubAccount, Owner<'_>) -> Result<(), E>,
    {
        for (primary, account) in self.accounts.iter_mut() {
            let is_reserves = account.is_reserves;
            for (id, sub) in account.sub_accounts.iter_mut() {
                visit(
                    sub,
                    Owner {
                        primary,
                        sub_account: *id,
                        is_reserves,
                    },
                )?;
            }
        }
        Ok(())
    }

    pub fn try_for_each_market_mut<F, E>(&mut self, mut visit: F) -> Result<(), E>
    where
        F: FnMut(&mut MarketPosition, Owner<'_>) -> Result<(), E>,
    {
        self.try_for_each_sub_account_mut(|sub, owner| {
            for market in sub.markets.iter_mut() {
                visit(market, owner)?;
            }
            Ok(())
        })
    }

    pub fn try_for_each_net_deposit_mut<F, E>(&mut self, mut visit: F) -> Result<(), E>
    where
        F: FnMut(&str, &mut NetDeposit, Owner<'_>) -> Result<(), E>,
    {
        self.try_for_each_sub_account_mut(|sub, owner| {
            for (underlying, deposit) in sub.deposits.deposits.iter_mut() {
                visit(underlying.as_str(), deposit, owner)?;
            }
            Ok(())
        })
    }

    /// Re-derive every primary account aggregate from its sub-accounts
    ///
    /// Redemption valuations of returned claims (`dai_claim_value`, `usdc_claim_value`,
    /// `total_returned_claims_value_at_redemption`) need prices and are left to the
    /// returned-asset passes.
    pub fn rebuild_account_totals(&mut self) {
        for account in self.accounts.values_mut() {
            let mut claims = AccountClaims {
                dai_claim_value: account.claims.dai_claim_value.clone(),
                usdc_claim_value: account.claims.usdc_claim_value.clone(),
                total_returned_claims_value_at_redemption: account
                    .claims
                    .total_returned_claims_value_at_redemption
                    .clone(),
                ..AccountClaims::default()
            };
            let mut current_nav = BigInt::zero();
            let mut foregone_profit = BigInt::zero();

            for sub in account.sub_accounts.values() {
                for (underlying, c) in &sub.claims.remaining {
                    let entry = claims
                        .remaining
                        .entry(underlying.clone())
                        .or_insert_with(|| AccountRemaining {
                            symbol: c.symbol.clone(),
                            decimals: c.decimals,
                            claim_amount: BigInt::zero(),
                            claim_value: BigInt::zero(),
                            claim_value_at_redemption: BigInt::zero(),
                        });
                    entry.claim_amount += &c.claim_amount;
                    entry.claim_value += &c.claim_value;
                    entry.claim_value_at_redemption += &c.claim_value_at_redemption;
                }
                claims.total_remaining_claims_value += &sub.claims.total_remaining_claims_value;
                claims.total_remaining_claims_value_at_redemption +=
                    &sub.claims.total_remaining_claims_value_at_redemption;
                claims.returned += &sub.claims.returned;
                current_nav += &sub.current_nav;
                foregone_profit += &sub.foregone_profit;
            }

            account.claims = claims;
            account.current_nav = current_nav;
            account.foregone_profit = foregone_profit;
            account.refresh_total_value();
        }
    }
}
