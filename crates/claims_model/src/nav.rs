//! Net deposits, NAV and foregone profit per sub-account

use std::collections::BTreeMap;

use log::{info, warn};
use num_bigint::BigInt;
use num_traits::{Signed, Zero};

use crate::error::{AnomalyKind, DataAnomaly, Result};
use crate::fixed::{clamp_non_negative, one};
use crate::ledger::{Deposits, Ledger, NetDeposit, Stage};
use crate::prices::Prices;

/// `(deposit - claimed) * (ONE - debt * ONE / denominator) / ONE`
///
/// Zero when `denominator <= 0`. The raw result may be negative; callers clamp.
pub fn net_deposit(deposit: &BigInt, claimed: &BigInt, debt_value: &BigInt, denominator: &BigInt) -> BigInt {
    if !denominator.is_positive() {
        return BigInt::zero();
    }
    let one = one();
    let debt_ratio = debt_value * &one / denominator;
    (deposit - claimed) * (&one - debt_ratio) / one
}

/// Compute net deposits, `currentNAV`, `currentNAVRedemption` and foregone profit
///
/// Both NAVs value net deposits at redemption prices. The settlement NAV nets debt and
/// remaining claims at settlement prices, the redemption NAV at redemption prices.
pub fn compute(mut ledger: Ledger, prices: &Prices) -> Result<Ledger> {
    ledger.expect_stage("nav", Stage::RemainingAllocated)?;

    let mut anomalies: Vec<DataAnomaly> = Vec::new();
    let mut total_current_nav = BigInt::zero();
    let mut total_foregone_profit = BigInt::zero();

    ledger.try_for_each_sub_account_mut(|sub, owner| -> Result<()> {
        let mut deposits: BTreeMap<String, NetDeposit> = BTreeMap::new();
        let mut totals = Deposits::default();

        for m in &sub.markets {
            let amount = m.deposit_amount();
            totals.total_deposits_value += prices.settlement.value_of(&amount, &m.underlying, m.decimals)?;
            totals.total_debt_value +=
                prices.settlement.value_of(&m.d_token_balance, &m.underlying, m.decimals)?;
            totals.total_deposits_value_redemption +=
                prices.redemption.value_of(&amount, &m.underlying, m.decimals)?;
            totals.total_debt_value_redemption +=
                prices.redemption.value_of(&m.d_token_balance, &m.underlying, m.decimals)?;

            deposits
                .entry(m.underlying.clone())
                .or_insert_with(|| NetDeposit::new(&m.symbol, m.decimals))
                .deposit_amount += amount;
        }

        let denominator = &totals.total_deposits_value - &sub.claims.total_remaining_claims_value;
        let denominator_redemption = &totals.total_deposits_value_redemption
            - &sub.claims.total_remaining_claims_value_at_redemption;

        let mut nav = BigInt::zero();
        let mut nav_redemption = BigInt::zero();

        for (underlying, d) in deposits.iter_mut() {
            let claimed = sub
                .claims
                .remaining
                .get(underlying)
                .map(|c| c.claim_amount.clone())
                .unwrap_or_default();

            let mut record = |kind: AnomalyKind, value: &BigInt| {
                warn!(
                    "{:?} for {}/{} in {}: {}, clamped to 0",
                    kind, owner.primary, owner.sub_account, underlying, value
                );
                anomalies.push(DataAnomaly {
                    kind,
                    account: owner.primary.to_string(),
                    sub_account: owner.sub_account,
                    underlying: Some(underlying.clone()),
                    detail: value.to_string(),
                });
            };

            let settled = net_deposit(&d.deposit_amount, &claimed, &totals.total_debt_value, &denominator);
            if settled.is_negative() {
                record(AnomalyKind::NegativeNetDeposit, &settled);
            }
            let redeemed = net_deposit(
                &d.deposit_amount,
                &claimed,
                &totals.total_debt_value_redemption,
                &denominator_redemption,
            );
            if redeemed.is_negative() {
                record(AnomalyKind::NegativeNetDepositRedemption, &redeemed);
            }

            d.net_deposit_amount = clamp_non_negative(settled);
            d.net_deposit_amount_redemption = clamp_non_negative(redeemed);

            nav += prices.redemption.value_of(&d.net_deposit_amount, underlying, d.decimals)?;
            nav_redemption +=
                prices
                    .redemption
                    .value_of(&d.net_deposit_amount_redemption, underlying, d.decimals)?;
        }

        totals.deposits = deposits;
        sub.deposits = totals;
        sub.foregone_profit = if owner.is_reserves {
            BigInt::zero()
        } else {
            clamp_non_negative(&nav_redemption - &nav)
        };
        total_current_nav += &nav;
        total_foregone_profit += &sub.foregone_profit;
        sub.current_nav = nav;
        sub.current_nav_redemption = nav_redemption;
        Ok(())
    })?;

    info!(
        "nav: total {} wei, foregone profit {} wei, {} anomalies",
        total_current_nav,
        total_foregone_profit,
        anomalies.len()
    );

    ledger.totals.total_current_nav = total_current_nav;
    ledger.totals.total_foregone_profit = total_foregone_profit;
    ledger.anomalies.extend(anomalies);
    ledger.rebuild_account_totals();
    ledger.stage = Stage::NavComputed;
    Ok(ledger)
}
