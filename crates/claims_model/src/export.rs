//! Human-readable claims views and the merkle distribution list

use std::collections::BTreeMap;

use log::info;
use merkle_dist::ClaimRecord;
use num_bigint::BigInt;
use num_traits::Zero;
use serde::Serialize;

use crate::error::Result;
use crate::fixed::{format_ether, format_units};
use crate::ledger::{
    Account, AccountRemaining, AssetAmounts, Ledger, MarketPosition, NetDeposit, RemainingClaim, Stage,
    SubAccount, SubAccountId,
};
use crate::returned::ReturnedAssets;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnedView {
    pub eth_claim_amount: String,
    pub dai_claim_amount: String,
    pub usdc_claim_amount: String,
}

impl From<&AssetAmounts> for ReturnedView {
    fn from(a: &AssetAmounts) -> Self {
        Self {
            eth_claim_amount: format_ether(&a.eth),
            dai_claim_amount: format_units(&a.dai, ReturnedAssets::DAI_DECIMALS),
            usdc_claim_amount: format_units(&a.usdc, ReturnedAssets::USDC_DECIMALS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemainingView {
    pub symbol: String,
    pub claim_amount: String,
    pub claim_value: String,
    pub claim_value_at_redemption: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub percentage: Option<String>,
}

impl From<&RemainingClaim> for RemainingView {
    fn from(c: &RemainingClaim) -> Self {
        Self {
            symbol: c.symbol.clone(),
            claim_amount: format_units(&c.claim_amount, c.decimals),
            claim_value: format_ether(&c.claim_value),
            claim_value_at_redemption: format_ether(&c.claim_value_at_redemption),
            percentage: Some(format_ether(&c.percentage)),
        }
    }
}

impl From<&AccountRemaining> for RemainingView {
    fn from(c: &AccountRemaining) -> Self {
        Self {
            symbol: c.symbol.clone(),
            claim_amount: format_units(&c.claim_amount, c.decimals),
            claim_value: format_ether(&c.claim_value),
            claim_value_at_redemption: format_ether(&c.claim_value_at_redemption),
            percentage: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketView {
    pub underlying: String,
    pub symbol: String,
    pub e_token_balance_underlying: String,
    pub d_token_balance: String,
    pub staked_e_token_balance_underlying: String,
    pub total_value: String,
}

impl From<&MarketPosition> for MarketView {
    fn from(m: &MarketPosition) -> Self {
        Self {
            underlying: m.underlying.clone(),
            symbol: m.symbol.clone(),
            e_token_balance_underlying: format_units(&m.e_token_balance_underlying, m.decimals),
            d_token_balance: format_units(&m.d_token_balance, m.decimals),
            staked_e_token_balance_underlying: format_units(&m.staked_e_token_balance_underlying, m.decimals),
            total_value: format_ether(&m.total_value),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetDepositView {
    pub symbol: String,
    pub deposit_amount: String,
    pub net_deposit_amount: String,
    pub net_deposit_amount_redemption: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_claims: Option<ReturnedView>,
}

impl From<&NetDeposit> for NetDepositView {
    fn from(d: &NetDeposit) -> Self {
        Self {
            symbol: d.symbol.clone(),
            deposit_amount: format_units(&d.deposit_amount, d.decimals),
            net_deposit_amount: format_units(&d.net_deposit_amount, d.decimals),
            net_deposit_amount_redemption: format_units(&d.net_deposit_amount_redemption, d.decimals),
            reserve_claims: d.reserve_claims.as_ref().map(ReturnedView::from),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubAccountView {
    pub address: String,
    pub total_value: String,
    #[serde(rename = "currentNAV")]
    pub current_nav: String,
    #[serde(rename = "currentNAVRedemption")]
    pub current_nav_redemption: String,
    pub foregone_profit: String,
    pub markets: Vec<MarketView>,
    pub net_deposits: BTreeMap<String, NetDepositView>,
    pub remaining: BTreeMap<String, RemainingView>,
    pub returned: ReturnedView,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_nav: Option<ReturnedView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserves: Option<ReturnedView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_pre_cap: Option<ReturnedView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_pre_foregone_profit: Option<ReturnedView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub returned_surplus: Option<ReturnedView>,
    pub returned_value_at_redemption: String,
}

impl From<&SubAccount> for SubAccountView {
    fn from(s: &SubAccount) -> Self {
        let c = &s.claims;
        Self {
            address: s.address.clone(),
            total_value: format_ether(&s.total_value),
            current_nav: format_ether(&s.current_nav),
            current_nav_redemption: format_ether(&s.current_nav_redemption),
            foregone_profit: format_ether(&s.foregone_profit),
            markets: s.markets.iter().map(MarketView::from).collect(),
            net_deposits: s
                .deposits
                .deposits
                .iter()
                .map(|(u, d)| (u.clone(), NetDepositView::from(d)))
                .collect(),
            remaining: c
                .remaining
                .iter()
                .map(|(u, r)| (u.clone(), RemainingView::from(r)))
                .collect(),
            returned: ReturnedView::from(&c.returned),
            returned_nav: c.returned_nav.as_ref().map(ReturnedView::from),
            reserves: c.reserves.as_ref().map(ReturnedView::from),
            returned_pre_cap: c.returned_pre_cap.as_ref().map(ReturnedView::from),
            returned_pre_foregone_profit: c.returned_pre_foregone_profit.as_ref().map(ReturnedView::from),
            returned_surplus: c.returned_surplus.as_ref().map(ReturnedView::from),
            returned_value_at_redemption: format_ether(&c.returned_value_at_redemption),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountView {
    pub sub_accounts_total_value: String,
    #[serde(rename = "currentNAV")]
    pub current_nav: String,
    pub foregone_profit: String,
    pub remaining: BTreeMap<String, RemainingView>,
    pub total_remaining_claims_value: String,
    pub total_remaining_claims_value_at_redemption: String,
    pub returned: ReturnedView,
    pub dai_claim_value: String,
    pub usdc_claim_value: String,
    pub total_returned_claims_value_at_redemption: String,
    pub sub_accounts: BTreeMap<SubAccountId, SubAccountView>,
}

impl From<&Account> for AccountView {
    fn from(a: &Account) -> Self {
        let c = &a.claims;
        Self {
            sub_accounts_total_value: format_ether(&a.sub_accounts_total_value),
            current_nav: format_ether(&a.current_nav),
            foregone_profit: format_ether(&a.foregone_profit),
            remaining: c
                .remaining
                .iter()
                .map(|(u, r)| (u.clone(), RemainingView::from(r)))
                .collect(),
            total_remaining_claims_value: format_ether(&c.total_remaining_claims_value),
            total_remaining_claims_value_at_redemption: format_ether(
                &c.total_remaining_claims_value_at_redemption,
            ),
            returned: ReturnedView::from(&c.returned),
            dai_claim_value: format_ether(&c.dai_claim_value),
            usdc_claim_value: format_ether(&c.usdc_claim_value),
            total_returned_claims_value_at_redemption: format_ether(
                &c.total_returned_claims_value_at_redemption,
            ),
            sub_accounts: a
                .sub_accounts
                .iter()
                .map(|(id, s)| (*id, SubAccountView::from(s)))
                .collect(),
        }
    }
}

/// Claims of every non-reserve account
pub fn user_claims(ledger: &Ledger) -> BTreeMap<String, AccountView> {
    ledger
        .user_accounts()
        .map(|(address, account)| (address.clone(), AccountView::from(account)))
        .collect()
}

/// Virtual claims of the reserve accounts
pub fn reserve_claims(ledger: &Ledger) -> BTreeMap<String, AccountView> {
    ledger
        .reserve_accounts()
        .map(|(address, account)| (address.clone(), AccountView::from(account)))
        .collect()
}

/// Merkle distribution list of a settled ledger
///
/// Accounts in ascending address order. Tokens: WETH, DAI, USDC, then each residual
/// underlying in ascending address order. Zero amounts are omitted.
///
/// An account left with nothing to claim gets no record and does not take an index:
/// indices run consecutively over claimants only, so they are not positions in the full
/// account set. A published list with empty `[index, account, []]` entries for such
/// accounts would number the same claimants differently.
pub fn distribution(ledger: &Ledger, assets: &ReturnedAssets) -> Result<Vec<ClaimRecord>> {
    ledger.expect_stage("distribution", Stage::Settled)?;

    let mut records = Vec::new();
    for (address, account) in ledger.user_accounts() {
        let returned = &account.claims.returned;
        let tokens: Vec<(String, String)> = assets
            .pairs(returned)
            .into_iter()
            .chain(
                account
                    .claims
                    .remaining
                    .iter()
                    .map(|(underlying, c)| (underlying.as_str(), &c.claim_amount)),
            )
            .filter(|(_, amount)| !amount.is_zero())
            .map(|(token, amount): (&str, &BigInt)| (token.to_string(), amount.to_string()))
            .collect();

        if tokens.is_empty() {
            continue;
        }
        records.push(ClaimRecord::new(records.len() as u64, address, &tokens)?);
    }

    info!("distribution: {} records from {} accounts", records.len(), ledger.user_accounts().count());
    Ok(records)
}
