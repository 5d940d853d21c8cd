//! Consistency checks over the settled ledger

use anyhow::{Context, Result};
use claims_model::audit::{self, AuditReport};
use claims_model::Ledger;
use colored::Colorize;

use crate::config::SettleConfig;
use crate::files::read_json;
use crate::settle::{ledger_path, load_inputs};

pub fn load_report(config: &SettleConfig) -> Result<AuditReport> {
    let inputs = load_inputs(config)?;
    let ledger: Ledger = read_json(&ledger_path(&config.output_dir()?))?;
    audit::run(&ledger, &inputs, &config.audit_params()?).context("Audit needs a settled ledger")
}

pub fn run(config: &SettleConfig) -> Result<()> {
    println!("{}", "=== Audit ===".bright_green().bold());

    let report = load_report(config)?;
    print_report(&report);

    let failed = report.failures().count();
    if failed > 0 {
        anyhow::bail!("{} of {} audit checks failed", failed, report.checks.len());
    }
    Ok(())
}

fn print_report(report: &AuditReport) {
    let width = report.checks.iter().map(|c| c.name.len()).max().unwrap_or(0);

    println!();
    for check in &report.checks {
        let status = if check.passed { "PASS".green() } else { "FAIL".red().bold() };
        println!("  {} {:<width$}  {}", status, check.name, check.detail.dimmed(), width = width);
    }

    if report.passed() {
        println!("\n  {} All {} checks passed", "✓".green(), report.checks.len());
    }
}
