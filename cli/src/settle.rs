//! Settlement run: load inputs, advance the ledger stage by stage, publish claims

use anyhow::{Context, Result};
use claims_model::events::BalanceEvent;
use claims_model::export;
use claims_model::fixed::format_ether;
use claims_model::{
    BalancesSnapshot, Ledger, Pipeline, PriceRegime, PriceTable, Prices, ResidualEntry, ResidualPools,
    SettlementInputs, Snapshot, Stage,
};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use log::warn;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::checkpoint::CheckpointStore;
use crate::config::SettleConfig;
use crate::files::{read_json, write_json};

pub fn ledger_path(output_dir: &Path) -> PathBuf {
    output_dir.join("ledger.json")
}

fn price_table(config: &SettleConfig, regime: PriceRegime, raw_path: &str) -> Result<PriceTable> {
    let path = config.resolve(raw_path)?;
    let raw: BTreeMap<String, String> = read_json(&path)?;
    PriceTable::from_strings(regime, &raw)
        .with_context(|| format!("Invalid {} prices in {}", regime, path.display()))
}

/// Prices, residual pools, recovered pool and cap
pub fn load_inputs(config: &SettleConfig) -> Result<SettlementInputs> {
    let prices = Prices::new(
        price_table(config, PriceRegime::Settlement, &config.inputs.settlement_prices)?,
        price_table(config, PriceRegime::Redemption, &config.inputs.redemption_prices)?,
    );

    let residual_path = config.resolve(&config.inputs.residual)?;
    let entries: Vec<ResidualEntry> = read_json(&residual_path)?;
    let residual = ResidualPools::from_entries(&entries, &config.residual_excluded_symbols())
        .with_context(|| format!("Invalid residual assets in {}", residual_path.display()))?;

    Ok(SettlementInputs {
        prices,
        residual,
        pool: config.pool_amounts()?,
        assets: config.returned_assets(),
        cap: config.cap()?,
    })
}

pub fn load_snapshot(config: &SettleConfig) -> Result<Snapshot> {
    let users: BalancesSnapshot = read_json(&config.resolve(&config.inputs.balances)?)?;
    let reserves: BalancesSnapshot = match &config.inputs.reserves {
        Some(path) => read_json(&config.resolve(path)?)?,
        None => BalancesSnapshot::new(),
    };
    let events: Vec<BalanceEvent> = match &config.inputs.events {
        Some(path) => read_json(&config.resolve(path)?)?,
        None => Vec::new(),
    };

    Ok(Snapshot {
        users,
        reserves,
        events,
    })
}

fn stage_progress(from: Stage) -> Result<ProgressBar> {
    let bar = ProgressBar::new((Stage::Settled.index() - from.index()) as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner:.green} [{bar:30.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("=> "),
    );
    Ok(bar)
}

pub fn run(config: &SettleConfig, resume: bool) -> Result<Ledger> {
    println!("{}", "=== Settle ===".bright_green().bold());

    let inputs = load_inputs(config)?;
    let pipeline = Pipeline::new(&inputs)?;
    let store = CheckpointStore::new(config.checkpoint_dir()?);

    let ledger = if resume {
        match store.latest()? {
            Some(ledger) => ledger,
            None => anyhow::bail!("No checkpoint found in {}", store.dir().display()),
        }
    } else {
        store.clear()?;
        let snapshot = load_snapshot(config)?;
        let ledger = Ledger::from_snapshot(&snapshot, &inputs.prices.settlement, &config.snapshot_options())
            .context("Failed to build ledger from snapshot")?;
        store.save(&ledger)?;
        ledger
    };

    println!("{} {}", "Starting at:".bright_cyan(), ledger.stage);
    println!("{} {}", "Accounts:".bright_cyan(), ledger.accounts.len());
    println!("{} {}", "Checkpoints:".bright_cyan(), store.dir().display());

    let progress = stage_progress(ledger.stage)?;
    let ledger = pipeline.run_from(ledger, |l: &Ledger| -> Result<()> {
        store.save(l)?;
        progress.set_message(l.stage.name());
        progress.inc(1);
        Ok(())
    })?;
    progress.finish_with_message("settled");

    publish(config, &ledger)?;
    print_totals(&ledger);
    Ok(ledger)
}

/// Write the settled ledger and the claims views
fn publish(config: &SettleConfig, ledger: &Ledger) -> Result<()> {
    let dir = config.output_dir()?;

    write_json(&ledger_path(&dir), ledger)?;
    write_json(&dir.join("user_claims.json"), &export::user_claims(ledger))?;
    write_json(&dir.join("reserve_claims.json"), &export::reserve_claims(ledger))?;
    write_json(&dir.join("anomalies.json"), &ledger.anomalies)?;

    println!("\n{} {}", "Written to:".bright_cyan(), dir.display());
    Ok(())
}

fn print_totals(ledger: &Ledger) {
    let totals = &ledger.totals;

    println!("\n{}", "Totals:".bright_yellow());
    println!("  {} {}", "Users:".bright_cyan(), ledger.user_accounts().count());
    println!("  {} {}", "Reserves:".bright_cyan(), ledger.reserve_accounts().count());
    println!("  {} {} ETH", "Total NAV:".bright_cyan(), format_ether(&totals.total_current_nav));
    println!(
        "  {} {} ETH",
        "Foregone profit:".bright_cyan(),
        format_ether(&totals.total_foregone_profit)
    );
    println!(
        "  {} {} / {} / {} (ETH / DAI / USDC raw)",
        "Surplus:".bright_cyan(),
        totals.surplus.eth,
        totals.surplus.dai,
        totals.surplus.usdc
    );
    if !totals.undistributed_surplus.is_zero() {
        println!(
            "  {} {} / {} / {}",
            "Undistributed surplus:".bright_cyan(),
            totals.undistributed_surplus.eth,
            totals.undistributed_surplus.dai,
            totals.undistributed_surplus.usdc
        );
    }
    for (underlying, amounts) in &totals.undistributed {
        println!(
            "  {} {}: {} / {} / {}",
            "Undistributed reserve claim".bright_cyan(),
            underlying,
            amounts.eth,
            amounts.dai,
            amounts.usdc
        );
    }

    if ledger.anomalies.is_empty() {
        println!("\n  {} No data anomalies", "✓".green());
    } else {
        warn!("{} data anomalies recorded", ledger.anomalies.len());
        println!(
            "\n  {} {} data anomalies, see anomalies.json",
            "⚠".yellow(),
            ledger.anomalies.len()
        );
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use claims_model::returned::{DAI, USDC};
    use std::fs;

    const TKN: &str = "0x1000000000000000000000000000000000000001";
    const A: &str = "0x00000000000000000000000000000000000000a0";
    const B: &str = "0x00000000000000000000000000000000000000b0";

    fn account_json(sub_address: &str, deposit: &str) -> serde_json::Value {
        serde_json::json!({
            "subAccounts": {
                "0": {
                    "address": sub_address,
                    "markets": [{
                        "underlying": TKN,
                        "symbol": "TKN",
                        "decimals": 18,
                        "eTokenBalanceUnderlying": deposit,
                        "dTokenBalance": "0.0"
                    }]
                }
            }
        })
    }

    /// Two depositors of 10 and 20 TKN, 6 TKN residual, 30 ETH recovered
    pub(crate) fn fixture(dir: &Path) -> SettleConfig {
        write_json(
            &dir.join("balances.json"),
            &serde_json::json!({
                A: account_json(A, "10.0"),
                B: account_json(B, "20.0"),
            }),
        )
        .unwrap();
        write_json(&dir.join("settlement.json"), &serde_json::json!({ TKN: "1.0" })).unwrap();
        write_json(
            &dir.join("redemption.json"),
            &serde_json::json!({
                TKN: "1.0",
                DAI: "0.0005",
                USDC: "0.0005",
            }),
        )
        .unwrap();
        write_json(
            &dir.join("residual.json"),
            &serde_json::json!([{
                "underlying": TKN,
                "symbol": "TKN",
                "decimals": 18,
                "balance": "6.0"
            }]),
        )
        .unwrap();

        let config = r#"
[inputs]
balances = "balances.json"
settlement_prices = "settlement.json"
redemption_prices = "redemption.json"
residual = "residual.json"

[pool]
eth = "30"
"#;
        let path = dir.join("claims.toml");
        fs::write(&path, config).unwrap();
        SettleConfig::load(&path).unwrap()
    }

    #[test]
    fn test_settle_writes_outputs_and_checkpoints() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());

        let ledger = run(&config, false).unwrap();
        assert_eq!(ledger.stage, Stage::Settled);

        let out = dir.path().join("out");
        for name in ["ledger.json", "user_claims.json", "reserve_claims.json", "anomalies.json"] {
            assert!(out.join(name).exists(), "{} missing", name);
        }
        let store = CheckpointStore::new(out.join("checkpoints"));
        for stage in Stage::ALL {
            assert!(store.path(stage).exists(), "{} checkpoint missing", stage);
        }

        let claims: serde_json::Value = read_json(&out.join("user_claims.json")).unwrap();
        assert_eq!(claims[A]["returned"]["ethClaimAmount"], "8.04");
        assert_eq!(claims[B]["returned"]["ethClaimAmount"], "16.08");
        assert_eq!(claims[A]["remaining"][TKN]["claimAmount"], "2.0");
    }

    #[test]
    fn test_resume_continues_from_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        let full = run(&config, false).unwrap();

        // drop everything past pro-rata allocation
        let store = CheckpointStore::new(config.checkpoint_dir().unwrap());
        for stage in [Stage::ReservesRedistributed, Stage::Capped, Stage::Settled] {
            fs::remove_file(store.path(stage)).unwrap();
        }

        assert_eq!(run(&config, true).unwrap(), full);
    }

    #[test]
    fn test_resume_without_checkpoint_fails() {
        let dir = tempfile::tempdir().unwrap();
        let config = fixture(dir.path());
        assert!(run(&config, true).is_err());
    }
}
