//! Merkle distribution commands

use anyhow::{Context, Result};
use claims_model::{export, Ledger};
use colored::Colorize;
use merkle_dist::{ClaimRecord, MerkleTree, B256};
use std::path::PathBuf;

use crate::config::SettleConfig;
use crate::files::{read_json, write_json};
use crate::settle::ledger_path;

fn distribution_path(config: &SettleConfig) -> Result<PathBuf> {
    Ok(config.output_dir()?.join("distribution.json"))
}

fn load_records(config: &SettleConfig) -> Result<Vec<ClaimRecord>> {
    read_json(&distribution_path(config)?)
}

/// Position of the record carrying claim `index`
fn position(records: &[ClaimRecord], index: u64) -> Result<usize> {
    records
        .iter()
        .position(|r| r.index == index)
        .with_context(|| format!("No claim with index {} in distribution", index))
}

/// Build `distribution.json` from the settled ledger
pub fn distribution(config: &SettleConfig) -> Result<B256> {
    println!("{}", "=== Distribution ===".bright_green().bold());

    let ledger: Ledger = read_json(&ledger_path(&config.output_dir()?))?;
    let records = export::distribution(&ledger, &config.returned_assets())?;
    let tree = MerkleTree::new(&records)?;

    let path = distribution_path(config)?;
    write_json(&path, &records)?;

    println!("{} {}", "Records:".bright_cyan(), records.len());
    println!("{} {}", "Root:".bright_cyan(), tree.root());
    println!("{} {}", "Written to:".bright_cyan(), path.display());
    Ok(tree.root())
}

pub fn root(config: &SettleConfig) -> Result<B256> {
    let tree = MerkleTree::new(&load_records(config)?)?;
    println!("{}", tree.root());
    Ok(tree.root())
}

/// Print the inclusion proof of claim `index` as a JSON array
pub fn proof(config: &SettleConfig, index: u64) -> Result<Vec<B256>> {
    let records = load_records(config)?;
    let tree = MerkleTree::new(&records)?;
    let proof = tree.proof(position(&records, index)?)?;

    let hex: Vec<String> = proof.iter().map(|h| h.to_string()).collect();
    println!("{}", serde_json::to_string_pretty(&hex)?);
    Ok(proof)
}

/// Check claim `index` against the distribution root, or against `expected` when given
pub fn verify(config: &SettleConfig, index: u64, expected: Option<&str>) -> Result<()> {
    println!("{}", "=== Verify Claim ===".bright_green().bold());

    let records = load_records(config)?;
    let tree = MerkleTree::new(&records)?;
    let at = position(&records, index)?;
    let record = &records[at];
    let proof = tree.proof(at)?;

    let root = match expected {
        Some(hex) => hex
            .parse::<B256>()
            .with_context(|| format!("Invalid root: {}", hex))?,
        None => tree.root(),
    };

    println!("{} {}", "Index:".bright_cyan(), record.index);
    println!("{} {}", "Account:".bright_cyan(), record.account);
    println!("{} {}", "Leaf:".bright_cyan(), record.leaf());
    println!("{} {}", "Root:".bright_cyan(), root);
    println!("{} {} nodes", "Proof:".bright_cyan(), proof.len());

    if !merkle_dist::verify(record.leaf(), &proof, root) {
        anyhow::bail!("Claim {} does not verify against {}", index, root);
    }
    println!("\n  {} Claim verifies", "✓".green());
    Ok(())
}

/// Per-token totals of the distribution
pub fn summary(config: &SettleConfig) -> Result<()> {
    println!("{}", "=== Distribution Summary ===".bright_green().bold());

    let records = load_records(config)?;
    let totals = merkle_dist::summary(&records)?;
    let assets = config.returned_assets();

    println!("{} {}", "Records:".bright_cyan(), records.len());
    println!("\n{}", "Totals (raw units):".bright_yellow());
    for (token, amount) in &totals {
        let token = token.to_string().to_lowercase();
        let label = if token == assets.weth {
            "WETH"
        } else if token == assets.dai {
            "DAI"
        } else if token == assets.usdc {
            "USDC"
        } else {
            "residual"
        };
        println!("  {} {} {}", format!("{:<8}", label).bright_cyan(), token, amount);
    }
    Ok(())
}
