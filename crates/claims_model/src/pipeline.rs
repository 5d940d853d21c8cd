//! Ordered settlement passes

use log::info;
use num_bigint::BigInt;

use crate::error::{Result, SettlementError};
use crate::fixed::{format_ether, one};
use crate::ledger::{AssetAmounts, Ledger, Stage};
use crate::prices::Prices;
use crate::residual::{self, ResidualPools};
use crate::returned::{self, ReturnedAssets};
use crate::nav;

/// Read-only inputs shared by every pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SettlementInputs {
    pub prices: Prices,
    pub residual: ResidualPools,
    /// Recovered ETH / DAI / USDC to distribute
    pub pool: AssetAmounts,
    pub assets: ReturnedAssets,
    /// Claim-to-NAV cap, 18 decimals
    pub cap: BigInt,
}

impl SettlementInputs {
    pub fn validate(&self) -> Result<()> {
        if self.cap < one() {
            return Err(SettlementError::InvalidCap(format_ether(&self.cap)));
        }
        Ok(())
    }
}

/// Run the single pass that moves `ledger` to its next stage
///
/// A settled ledger is returned unchanged.
pub fn advance(ledger: Ledger, inputs: &SettlementInputs) -> Result<Ledger> {
    let from = ledger.stage;
    let ledger = match from {
        Stage::Snapshot => residual::allocate(ledger, &inputs.residual, &inputs.prices)?,
        Stage::RemainingAllocated => nav::compute(ledger, &inputs.prices)?,
        Stage::NavComputed => returned::allocate_pro_rata(
            ledger,
            &inputs.pool,
            &inputs.assets,
            &inputs.prices.redemption,
        )?,
        Stage::ProRataAllocated => returned::redistribute_reserves(ledger)?,
        Stage::ReservesRedistributed => returned::enforce_cap(
            ledger,
            &inputs.cap,
            &inputs.assets,
            &inputs.prices.redemption,
        )?,
        Stage::Capped => {
            returned::redistribute_surplus(ledger, &inputs.assets, &inputs.prices.redemption)?
        }
        Stage::Settled => return Ok(ledger),
    };
    info!("stage {} -> {}", from, ledger.stage);
    Ok(ledger)
}

pub struct Pipeline<'a> {
    inputs: &'a SettlementInputs,
}

impl<'a> Pipeline<'a> {
    pub fn new(inputs: &'a SettlementInputs) -> Result<Self> {
        inputs.validate()?;
        Ok(Self { inputs })
    }

    /// Advance `ledger` to `Settled`, calling `observer` after every completed stage
    pub fn run_from<F, E>(&self, mut ledger: Ledger, mut observer: F) -> Result<Ledger, E>
    where
        F: FnMut(&Ledger) -> Result<(), E>,
        E: From<SettlementError>,
    {
        while ledger.stage != Stage::Settled {
            ledger = advance(ledger, self.inputs)?;
            observer(&ledger)?;
        }
        Ok(ledger)
    }

    pub fn run(&self, ledger: Ledger) -> Result<Ledger> {
        self.run_from(ledger, |_| Ok(()))
    }
}
