//! Settlement run configuration

use anyhow::{Context, Result};
use claims_model::audit::AuditParams;
use claims_model::fixed::{one, parse_ether, parse_units};
use claims_model::returned::{DAI, USDC, WETH};
use claims_model::{AssetAmounts, BigInt, ReturnedAssets, SnapshotOptions};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid {field}: {value:?}")]
    InvalidValue { field: &'static str, value: String },

    #[error("claim_to_nav_cap must be at least 1.0, got {0}")]
    CapBelowOne(String),
}

/// Input file locations, relative paths resolve against the config file's directory
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InputPaths {
    pub balances: String,
    pub reserves: Option<String>,
    pub events: Option<String>,
    pub settlement_prices: String,
    pub redemption_prices: String,
    pub residual: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputPaths {
    #[serde(default = "default_output_dir")]
    pub dir: String,
    /// Defaults to `<dir>/checkpoints`
    pub checkpoints: Option<String>,
}

impl Default for OutputPaths {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            checkpoints: None,
        }
    }
}

/// Recovered assets as decimal strings
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PoolConfig {
    #[serde(default = "zero")]
    pub eth: String,
    #[serde(default = "zero")]
    pub dai: String,
    #[serde(default = "zero")]
    pub usdc: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettlementConfig {
    #[serde(default = "default_cap")]
    pub claim_to_nav_cap: String,
    #[serde(default)]
    pub excluded_accounts: Vec<String>,
    /// Collateral whose residual balance joins the main distribution
    #[serde(default)]
    pub residual_excluded_symbols: Vec<String>,
    #[serde(default = "default_dust")]
    pub dust_threshold: String,
    #[serde(default = "default_dust")]
    pub fair_share_tolerance: String,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self {
            claim_to_nav_cap: default_cap(),
            excluded_accounts: Vec::new(),
            residual_excluded_symbols: Vec::new(),
            dust_threshold: default_dust(),
            fair_share_tolerance: default_dust(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AssetsConfig {
    #[serde(default = "default_weth")]
    pub weth: String,
    #[serde(default = "default_dai")]
    pub dai: String,
    #[serde(default = "default_usdc")]
    pub usdc: String,
}

impl Default for AssetsConfig {
    fn default() -> Self {
        Self {
            weth: default_weth(),
            dai: default_dai(),
            usdc: default_usdc(),
        }
    }
}

fn default_output_dir() -> String {
    "out".to_string()
}

fn zero() -> String {
    "0".to_string()
}

fn default_cap() -> String {
    "1.005".to_string()
}

fn default_dust() -> String {
    "0.0001".to_string()
}

fn default_weth() -> String {
    WETH.to_string()
}

fn default_dai() -> String {
    DAI.to_string()
}

fn default_usdc() -> String {
    USDC.to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SettleConfig {
    pub inputs: InputPaths,
    #[serde(default)]
    pub outputs: OutputPaths,
    pub pool: PoolConfig,
    #[serde(default)]
    pub settlement: SettlementConfig,
    #[serde(default)]
    pub assets: AssetsConfig,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl SettleConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let mut config: SettleConfig = toml::from_str(&data)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        config.base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        config
            .validate()
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let cap = self.cap()?;
        if cap < one() {
            return Err(ConfigError::CapBelowOne(self.settlement.claim_to_nav_cap.clone()).into());
        }
        self.pool_amounts()?;
        self.audit_params()?;
        Ok(())
    }

    /// Expand `~` and environment variables, then anchor relative paths at the config dir
    pub fn resolve(&self, raw: &str) -> Result<PathBuf> {
        let expanded = shellexpand::full(raw).with_context(|| format!("Failed to expand path: {}", raw))?;
        let path = PathBuf::from(expanded.as_ref());
        Ok(if path.is_absolute() {
            path
        } else {
            self.base_dir.join(path)
        })
    }

    pub fn output_dir(&self) -> Result<PathBuf> {
        self.resolve(&self.outputs.dir)
    }

    pub fn checkpoint_dir(&self) -> Result<PathBuf> {
        match &self.outputs.checkpoints {
            Some(dir) => self.resolve(dir),
            None => Ok(self.output_dir()?.join("checkpoints")),
        }
    }

    pub fn cap(&self) -> Result<BigInt> {
        ether_field("claim_to_nav_cap", &self.settlement.claim_to_nav_cap)
    }

    pub fn pool_amounts(&self) -> Result<AssetAmounts> {
        Ok(AssetAmounts::new(
            units_field("pool.eth", &self.pool.eth, 18)?,
            units_field("pool.dai", &self.pool.dai, ReturnedAssets::DAI_DECIMALS)?,
            units_field("pool.usdc", &self.pool.usdc, ReturnedAssets::USDC_DECIMALS)?,
        ))
    }

    pub fn returned_assets(&self) -> ReturnedAssets {
        ReturnedAssets::new(&self.assets.weth, &self.assets.dai, &self.assets.usdc)
    }

    pub fn snapshot_options(&self) -> SnapshotOptions {
        SnapshotOptions::new(&self.settlement.excluded_accounts)
    }

    pub fn residual_excluded_symbols(&self) -> BTreeSet<String> {
        self.settlement.residual_excluded_symbols.iter().cloned().collect()
    }

    pub fn audit_params(&self) -> Result<AuditParams> {
        Ok(AuditParams {
            dust_threshold: ether_field("dust_threshold", &self.settlement.dust_threshold)?,
            fair_share_tolerance: ether_field(
                "fair_share_tolerance",
                &self.settlement.fair_share_tolerance,
            )?,
        })
    }
}

fn ether_field(field: &'static str, value: &str) -> Result<BigInt> {
    parse_ether(value).map_err(|_| {
        ConfigError::InvalidValue {
            field,
            value: value.to_string(),
        }
        .into()
    })
}

fn units_field(field: &'static str, value: &str, decimals: u8) -> Result<BigInt> {
    parse_units(value, decimals).map_err(|_| {
        ConfigError::InvalidValue {
            field,
            value: value.to_string(),
        }
        .into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const MINIMAL: &str = r#"
[inputs]
balances = "balances.json"
settlement_prices = "prices/settlement.json"
redemption_prices = "prices/redemption.json"
residual = "residual.json"

[pool]
eth = "1.5"
usdc = "2.25"
"#;

    fn write_config(dir: &Path, body: &str) -> PathBuf {
        let path = dir.join("claims.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_defaults_applied() {
        let dir = tempfile::tempdir().unwrap();
        let config = SettleConfig::load(&write_config(dir.path(), MINIMAL)).unwrap();

        assert_eq!(config.cap().unwrap(), parse_ether("1.005").unwrap());
        assert_eq!(config.returned_assets(), ReturnedAssets::mainnet());
        assert_eq!(config.audit_params().unwrap(), AuditParams::default());
        assert_eq!(config.output_dir().unwrap(), dir.path().join("out"));
        assert_eq!(config.checkpoint_dir().unwrap(), dir.path().join("out").join("checkpoints"));
    }

    #[test]
    fn test_pool_parsed_at_token_scale() {
        let dir = tempfile::tempdir().unwrap();
        let config = SettleConfig::load(&write_config(dir.path(), MINIMAL)).unwrap();
        let pool = config.pool_amounts().unwrap();

        assert_eq!(pool.eth, parse_ether("1.5").unwrap());
        assert_eq!(pool.dai, BigInt::from(0));
        assert_eq!(pool.usdc, BigInt::from(2_250_000));
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = SettleConfig::load(&write_config(dir.path(), MINIMAL)).unwrap();

        assert_eq!(
            config.resolve(&config.inputs.settlement_prices).unwrap(),
            dir.path().join("prices/settlement.json")
        );
        assert_eq!(config.resolve("/abs/file.json").unwrap(), PathBuf::from("/abs/file.json"));
    }

    #[test]
    fn test_cap_below_one_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("{}\n[settlement]\nclaim_to_nav_cap = \"0.95\"\n", MINIMAL);
        let err = SettleConfig::load(&write_config(dir.path(), &body)).unwrap_err();

        assert_eq!(
            err.root_cause().downcast_ref::<ConfigError>(),
            Some(&ConfigError::CapBelowOne("0.95".to_string()))
        );
    }

    #[test]
    fn test_lossy_pool_amount_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = MINIMAL.replace("usdc = \"2.25\"", "usdc = \"0.0000001\"");
        let err = SettleConfig::load(&write_config(dir.path(), &body)).unwrap_err();

        assert!(err.root_cause().to_string().contains("pool.usdc"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let body = format!("{}\n[settlement]\ncap = \"1.1\"\n", MINIMAL);
        assert!(SettleConfig::load(&write_config(dir.path(), &body)).is_err());
    }
}
