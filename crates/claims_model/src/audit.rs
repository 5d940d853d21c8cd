//! Post-settlement consistency checks
//!
//! Every check is recomputed from the settled ledger and the run inputs. Truncating
//! division loses at most one smallest unit per division, so conservation checks accept
//! shortfalls bounded by the number of divisions involved and never accept excess.

use num_bigint::BigInt;
use num_traits::{Signed, Zero};
use serde::Serialize;

use crate::error::Result;
use crate::fixed::{format_ether, mul_div, one, parse_ether};
use crate::ledger::{AssetAmounts, Ledger, Stage};
use crate::pipeline::SettlementInputs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditParams {
    /// NAVs below this (wei) are skipped by the fair share check
    pub dust_threshold: BigInt,
    /// Largest accepted deviation of a claim-to-NAV ratio from the reference, 18 decimals
    pub fair_share_tolerance: BigInt,
}

impl Default for AuditParams {
    fn default() -> Self {
        let v = parse_ether("0.0001").unwrap_or_default();
        Self {
            dust_threshold: v.clone(),
            fair_share_tolerance: v,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuditCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl AuditCheck {
    fn new(name: impl Into<String>, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    pub checks: Vec<AuditCheck>,
}

impl AuditReport {
    pub fn passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failures(&self) -> impl Iterator<Item = &AuditCheck> {
        self.checks.iter().filter(|c| !c.passed)
    }
}

/// Run every check against a settled ledger
pub fn run(ledger: &Ledger, inputs: &SettlementInputs, params: &AuditParams) -> Result<AuditReport> {
    ledger.expect_stage("audit", Stage::Settled)?;

    let mut report = AuditReport::default();
    report.checks.extend(remaining_conservation(ledger, inputs));
    report.checks.extend(returned_conservation(ledger, inputs));
    report.checks.push(cap_respected(ledger, inputs)?);
    report.checks.extend(fair_share(ledger, inputs, params)?);
    report.checks.push(surplus_targeting(ledger));
    Ok(report)
}

/// User claims on each residual pool add up to `min(available, user deposits)`
fn remaining_conservation(ledger: &Ledger, inputs: &SettlementInputs) -> Vec<AuditCheck> {
    inputs
        .residual
        .iter()
        .map(|(underlying, pool)| {
            let mut claimed = BigInt::zero();
            let mut deposits = BigInt::zero();
            let mut claimants = 0u64;
            ledger.for_each_sub_account(|sub, owner| {
                if owner.is_reserves {
                    return;
                }
                if let Some(c) = sub.claims.remaining.get(underlying) {
                    claimed += &c.claim_amount;
                    deposits += &c.deposits;
                    claimants += 1;
                }
            });

            let expected = if pool.available < deposits {
                pool.available.clone()
            } else {
                deposits
            };
            let shortfall = &expected - &claimed;
            let passed = !shortfall.is_negative() && shortfall < BigInt::from(claimants.max(1));
            AuditCheck::new(
                format!("remaining {}", pool.symbol),
                passed,
                format!(
                    "{} claimants, claimed {} of {} (shortfall {})",
                    claimants, claimed, expected, shortfall
                ),
            )
        })
        .collect()
}

/// Claims, undistributed reserve claims and undistributed surplus add up to the pool
fn returned_conservation(ledger: &Ledger, inputs: &SettlementInputs) -> Vec<AuditCheck> {
    let mut distributed = AssetAmounts::default();
    ledger.for_each_sub_account(|sub, owner| {
        if !owner.is_reserves {
            distributed += &sub.claims.returned;
        }
    });
    for amounts in ledger.totals.undistributed.values() {
        distributed += amounts;
    }
    distributed += &ledger.totals.undistributed_surplus;

    let subs = BigInt::from(ledger.sub_account_count());
    let reserves = BigInt::from(ledger.reserve_accounts().count());
    let one = one();

    let pool = &inputs.pool;
    [
        ("ETH", &pool.eth, &distributed.eth),
        ("DAI", &pool.dai, &distributed.dai),
        ("USDC", &pool.usdc, &distributed.usdc),
    ]
    .into_iter()
    .map(|(symbol, total, paid)| {
        // one truncation per pro-rata share (amplified by the share scale) and one per
        // reserve recipient
        let bound = &subs * (total / &one + 1u8) + &reserves * &subs + 1u8;
        let shortfall = total - paid;
        let passed = !shortfall.is_negative() && shortfall < bound;
        AuditCheck::new(
            format!("returned {}", symbol),
            passed,
            format!("paid {} of {} (shortfall {})", paid, total, shortfall),
        )
    })
    .collect()
}

/// Pre-redistribution claim value never exceeds `cap * currentNAV`
fn cap_respected(ledger: &Ledger, inputs: &SettlementInputs) -> Result<AuditCheck> {
    let one = one();
    let slack = BigInt::from(2u8);
    let mut checked = 0usize;
    let mut violations = Vec::new();

    for (address, account) in ledger.user_accounts() {
        for (id, sub) in &account.sub_accounts {
            if !sub.current_nav.is_positive() {
                continue;
            }
            let claim = sub
                .claims
                .returned_pre_foregone_profit
                .as_ref()
                .unwrap_or(&sub.claims.returned);
            let value = inputs.assets.value_of(claim, &inputs.prices.redemption)?;
            let limit = &sub.current_nav * &inputs.cap / &one;
            checked += 1;
            if value > &limit + &slack {
                violations.push(format!(
                    "{}/{}: {}",
                    address,
                    id,
                    format_ether(&mul_div(&value, &one, &sub.current_nav))
                ));
            }
        }
    }

    Ok(AuditCheck::new(
        "cap",
        violations.is_empty(),
        if violations.is_empty() {
            format!("{} sub-accounts within {}", checked, format_ether(&inputs.cap))
        } else {
            format!("{} above cap, first {}", violations.len(), violations[0])
        },
    ))
}

/// Ratios `(label, ratio)`; returns a check comparing each against the first
fn compare_ratios(name: &str, ratios: &[(String, BigInt)], tolerance: &BigInt) -> AuditCheck {
    let Some((_, reference)) = ratios.first() else {
        return AuditCheck::new(name, true, "nothing above dust");
    };

    let outliers: Vec<&String> = ratios
        .iter()
        .filter(|(_, r)| (r - reference).abs() > *tolerance)
        .map(|(label, _)| label)
        .collect();

    AuditCheck::new(
        name,
        outliers.is_empty(),
        if outliers.is_empty() {
            format!("{} within {} of {}", ratios.len(), format_ether(tolerance), format_ether(reference))
        } else {
            format!("{} outside tolerance, first {}", outliers.len(), outliers[0])
        },
    )
}

/// Pro-rata claim value per unit of NAV is the same for everyone
///
/// Ratios are gathered first, then compared against the first one in address order.
fn fair_share(ledger: &Ledger, inputs: &SettlementInputs, params: &AuditParams) -> Result<Vec<AuditCheck>> {
    let one = one();
    let prices = &inputs.prices.redemption;
    let mut sub_ratios = Vec::new();
    let mut account_ratios = Vec::new();

    for (address, account) in ledger.user_accounts() {
        let mut account_nav = BigInt::zero();
        let mut account_value = BigInt::zero();

        for (id, sub) in &account.sub_accounts {
            let value = match &sub.claims.returned_nav {
                Some(claim) => inputs.assets.value_of(claim, prices)?,
                None => BigInt::zero(),
            };
            account_nav += &sub.current_nav;
            account_value += &value;

            if sub.current_nav >= params.dust_threshold {
                sub_ratios.push((format!("{}/{}", address, id), mul_div(&value, &one, &sub.current_nav)));
            }
        }

        if account_nav >= params.dust_threshold {
            account_ratios.push((address.clone(), mul_div(&account_value, &one, &account_nav)));
        }
    }

    Ok(vec![
        compare_ratios("fair share (sub-accounts)", &sub_ratios, &params.fair_share_tolerance),
        compare_ratios("fair share (accounts)", &account_ratios, &params.fair_share_tolerance),
    ])
}

/// Surplus only reaches holders of foregone profit and is fully accounted for
fn surplus_targeting(ledger: &Ledger) -> AuditCheck {
    let mut handed_out = AssetAmounts::default();
    let mut misdirected = 0usize;

    ledger.for_each_sub_account(|sub, owner| {
        if let Some(share) = &sub.claims.returned_surplus {
            handed_out += share;
            if owner.is_reserves || !sub.foregone_profit.is_positive() {
                misdirected += 1;
            }
        }
    });
    handed_out += &ledger.totals.undistributed_surplus;

    let balanced = handed_out == ledger.totals.surplus;
    AuditCheck::new(
        "surplus targeting",
        balanced && misdirected == 0,
        format!(
            "surplus {} ETH {} DAI {} USDC, {} shares to accounts without foregone profit",
            ledger.totals.surplus.eth, ledger.totals.surplus.dai, ledger.totals.surplus.usdc, misdirected
        ),
    )
}
