//! Distribution of recovered ETH, DAI and USDC
//!
//! Four passes, each a pure `Ledger -> Ledger` step:
//!
//! 1. pro-rata share of the pool by `currentNAV`
//! 2. reserve accounts' shares handed to the net depositors of their market
//! 3. claims worth more than `cap * currentNAV` scaled down, the excess pooled as surplus
//! 4. surplus handed out in proportion to foregone profit

use std::collections::BTreeMap;

use log::{debug, info};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{AnomalyKind, DataAnomaly, Result};
use crate::fixed::{format_ether, mul_div, one};
use crate::ledger::{AssetAmounts, Ledger, Stage};
use crate::prices::PriceTable;

pub const WETH: &str = "0xc02aaa39b223fe8d0a0e5c4f27ead9083c756cc2";
pub const DAI: &str = "0x6b175474e89094c44da98b954eedeac495271d0f";
pub const USDC: &str = "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48";

/// Token addresses of the recovered assets
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnedAssets {
    pub weth: String,
    pub dai: String,
    pub usdc: String,
}

impl Default for ReturnedAssets {
    fn default() -> Self {
        Self::mainnet()
    }
}

impl ReturnedAssets {
    pub const DAI_DECIMALS: u8 = 18;
    pub const USDC_DECIMALS: u8 = 6;

    pub fn mainnet() -> Self {
        Self::new(WETH, DAI, USDC)
    }

    pub fn new(weth: &str, dai: &str, usdc: &str) -> Self {
        Self {
            weth: weth.to_lowercase(),
            dai: dai.to_lowercase(),
            usdc: usdc.to_lowercase(),
        }
    }

    /// ETH value of `amounts`. ETH counts 1:1, DAI and USDC are priced by `prices`.
    pub fn value_of(&self, amounts: &AssetAmounts, prices: &PriceTable) -> Result<BigInt> {
        Ok(&amounts.eth
            + self.dai_value(&amounts.dai, prices)?
            + self.usdc_value(&amounts.usdc, prices)?)
    }

    pub fn dai_value(&self, amount: &BigInt, prices: &PriceTable) -> Result<BigInt> {
        prices.value_of(amount, &self.dai, Self::DAI_DECIMALS)
    }

    pub fn usdc_value(&self, amount: &BigInt, prices: &PriceTable) -> Result<BigInt> {
        prices.value_of(amount, &self.usdc, Self::USDC_DECIMALS)
    }

    /// `(token, amount)` pairs in payout order
    pub fn pairs<'a>(&'a self, amounts: &'a AssetAmounts) -> [(&'a str, &'a BigInt); 3] {
        [
            (self.weth.as_str(), &amounts.eth),
            (self.dai.as_str(), &amounts.dai),
            (self.usdc.as_str(), &amounts.usdc),
        ]
    }
}

/// Pass 1: `claim = pool * (currentNAV * ONE / totalCurrentNAV) / ONE`
///
/// Every sub-account takes part, reserves included. A zero total NAV yields zero claims.
pub fn allocate_pro_rata(
    mut ledger: Ledger,
    pool: &AssetAmounts,
    assets: &ReturnedAssets,
    prices: &PriceTable,
) -> Result<Ledger> {
    ledger.expect_stage("pro-rata allocation", Stage::NavComputed)?;

    let one = one();
    let total_nav = ledger.totals.total_current_nav.clone();
    let mut anomalies = Vec::new();

    ledger.try_for_each_sub_account_mut(|sub, owner| -> Result<()> {
        let nav = if sub.current_nav.is_negative() {
            anomalies.push(DataAnomaly {
                kind: AnomalyKind::NegativeNav,
                account: owner.primary.to_string(),
                sub_account: owner.sub_account,
                underlying: None,
                detail: sub.current_nav.to_string(),
            });
            BigInt::zero()
        } else {
            sub.current_nav.clone()
        };

        let share = mul_div(&nav, &one, &total_nav);
        let claim = pool.mul_div(&share, &one);
        let value = assets.value_of(&claim, prices)?;

        sub.claims.claims_to_nav = Some(mul_div(&value, &one, &nav));
        sub.claims.returned_value_at_redemption = value;
        sub.claims.nav_share = share;
        sub.claims.returned_nav = Some(claim.clone());
        sub.claims.returned = claim;
        Ok(())
    })?;

    info!(
        "pro-rata: {} ETH, {} DAI, {} USDC over total NAV {}",
        pool.eth,
        pool.dai,
        pool.usdc,
        format_ether(&total_nav)
    );

    ledger.anomalies.extend(anomalies);
    ledger.rebuild_account_totals();
    ledger.stage = Stage::ProRataAllocated;
    Ok(ledger)
}

/// Pass 2: each reserve account's claim goes to the non-reserve net depositors of the
/// reserve's market, by `netDepositAmount`
///
/// With no net user deposits in that market the claim is recorded as undistributed.
pub fn redistribute_reserves(mut ledger: Ledger) -> Result<Ledger> {
    ledger.expect_stage("reserve redistribution", Stage::ProRataAllocated)?;

    let one = one();

    let mut user_totals: BTreeMap<String, BigInt> = BTreeMap::new();
    ledger.for_each_net_deposit(|underlying, d, owner| {
        if !owner.is_reserves {
            *user_totals.entry(underlying.to_string()).or_insert_with(BigInt::zero) +=
                &d.net_deposit_amount;
        }
    });

    let reserve_claims: Vec<(String, String, AssetAmounts)> = ledger
        .reserve_accounts()
        .filter_map(|(address, account)| {
            let market = account.reserve_market()?;
            Some((address.clone(), market.underlying.clone(), account.claims.returned.clone()))
        })
        .collect();

    for (reserve, underlying, claim) in reserve_claims {
        if claim.is_zero() {
            continue;
        }
        let total = user_totals.get(&underlying).cloned().unwrap_or_default();
        if !total.is_positive() {
            info!("reserve {}: no net user deposits in {}, claim left undistributed", reserve, underlying);
            *ledger.totals.undistributed.entry(underlying).or_default() += &claim;
            continue;
        }

        debug!("reserve {}: spreading over {} of {}", reserve, total, underlying);
        ledger.try_for_each_sub_account_mut(|sub, owner| -> Result<()> {
            if owner.is_reserves {
                return Ok(());
            }
            let Some(d) = sub.deposits.deposits.get_mut(&underlying) else {
                return Ok(());
            };
            let share = claim.mul_div(&d.net_deposit_amount, &total);
            d.reserve_percentage = Some(mul_div(&d.net_deposit_amount, &one, &total));
            *d.reserve_claims.get_or_insert_with(AssetAmounts::default) += &share;
            *sub.claims.reserves.get_or_insert_with(AssetAmounts::default) += &share;
            sub.claims.returned += &share;
            Ok(())
        })?;
    }

    ledger.rebuild_account_totals();
    ledger.stage = Stage::ReservesRedistributed;
    Ok(ledger)
}

/// Pass 3: scale down claims worth more than `cap * currentNAV`
///
/// The capped claim is `claim * (currentNAV * cap / ONE) / claimValue` per asset, the
/// difference goes to the surplus pool. Reserve accounts are not capped.
pub fn enforce_cap(
    mut ledger: Ledger,
    cap: &BigInt,
    assets: &ReturnedAssets,
    prices: &PriceTable,
) -> Result<Ledger> {
    ledger.expect_stage("cap", Stage::ReservesRedistributed)?;

    let one = one();
    let mut surplus = AssetAmounts::default();
    let mut capped = 0usize;

    ledger.try_for_each_sub_account_mut(|sub, owner| -> Result<()> {
        if owner.is_reserves {
            return Ok(());
        }
        let nav = &sub.current_nav;
        let value = assets.value_of(&sub.claims.returned, prices)?;
        let factor = mul_div(&value, &one, nav);

        if nav.is_positive() && &factor > cap {
            let limit = nav * cap / &one;
            let scaled = sub.claims.returned.mul_div(&limit, &value);
            let excess = &sub.claims.returned - &scaled;
            debug!(
                "cap {}/{}: claim to NAV {} reduced to {}",
                owner.primary,
                owner.sub_account,
                format_ether(&factor),
                format_ether(cap)
            );

            surplus += &excess;
            capped += 1;

            let capped_value = assets.value_of(&scaled, prices)?;
            sub.claims.claims_to_nav = Some(mul_div(&capped_value, &one, nav));
            sub.claims.returned_value_at_redemption = capped_value;
            sub.claims.returned_pre_cap = Some(std::mem::replace(&mut sub.claims.returned, scaled));
        } else {
            sub.claims.claims_to_nav = Some(factor);
            sub.claims.returned_value_at_redemption = value;
        }
        Ok(())
    })?;

    info!(
        "cap {}: {} sub-accounts capped, surplus {} ETH {} DAI {} USDC",
        format_ether(cap),
        capped,
        surplus.eth,
        surplus.dai,
        surplus.usdc
    );

    ledger.totals.surplus = surplus;
    ledger.rebuild_account_totals();
    ledger.stage = Stage::Capped;
    Ok(ledger)
}

/// Pass 4: hand the surplus to sub-accounts with foregone profit, in proportion to it
///
/// Afterwards account level redemption values are filled in.
pub fn redistribute_surplus(
    mut ledger: Ledger,
    assets: &ReturnedAssets,
    prices: &PriceTable,
) -> Result<Ledger> {
    ledger.expect_stage("surplus redistribution", Stage::Capped)?;

    let surplus = ledger.totals.surplus.clone();
    let total_fp = ledger.totals.total_foregone_profit.clone();
    let mut distributed = AssetAmounts::default();
    let mut recipients = 0usize;

    ledger.try_for_each_sub_account_mut(|sub, owner| -> Result<()> {
        sub.claims.claims_to_nav = None;
        if owner.is_reserves || !sub.foregone_profit.is_positive() || !total_fp.is_positive() {
            return Ok(());
        }

        let share = surplus.mul_div(&sub.foregone_profit, &total_fp);
        distributed += &share;
        recipients += 1;

        let mut returned = sub.claims.returned.clone();
        returned += &share;
        sub.claims.returned_value_at_redemption = assets.value_of(&returned, prices)?;
        sub.claims.returned_pre_foregone_profit =
            Some(std::mem::replace(&mut sub.claims.returned, returned));
        sub.claims.returned_surplus = Some(share);
        Ok(())
    })?;

    let undistributed = &surplus - &distributed;
    info!(
        "surplus: {} recipients, undistributed {} ETH {} DAI {} USDC",
        recipients, undistributed.eth, undistributed.dai, undistributed.usdc
    );
    ledger.totals.undistributed_surplus = undistributed;

    ledger.rebuild_account_totals();
    for account in ledger.accounts.values_mut() {
        let returned = &account.claims.returned;
        account.claims.dai_claim_value = assets.dai_value(&returned.dai, prices)?;
        account.claims.usdc_claim_value = assets.usdc_value(&returned.usdc, prices)?;
        account.claims.total_returned_claims_value_at_redemption = assets.value_of(returned, prices)?;
    }

    ledger.stage = Stage::Settled;
    Ok(ledger)
}
