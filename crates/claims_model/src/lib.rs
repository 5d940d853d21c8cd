//! Recovery claims settlement model
//!
//! Turns a frozen snapshot of lending positions into per-account claims on residual
//! market balances and on externally recovered ETH, DAI and USDC.
//!
//! Pure computation: callers hand in parsed snapshots, prices and pool sizes, and get
//! back a settled [`Ledger`]. All arithmetic is exact integer math on [`BigInt`].
//!
//! Passes run strictly in order, each over every account:
//!
//! 1. [`residual::allocate`] residual pools by net deposit
//! 2. [`nav::compute`] net deposits, NAV and foregone profit
//! 3. [`returned::allocate_pro_rata`] recovered assets by NAV
//! 4. [`returned::redistribute_reserves`] reserve shares to market depositors
//! 5. [`returned::enforce_cap`] claim-to-NAV cap, excess to surplus
//! 6. [`returned::redistribute_surplus`] surplus by foregone profit

#![forbid(unsafe_code)]

pub mod audit;
pub mod error;
pub mod events;
pub mod export;
pub mod fixed;
pub mod ledger;
pub mod nav;
pub mod pipeline;
pub mod prices;
pub mod residual;
pub mod returned;
pub mod snapshot;

#[cfg(test)]
pub(crate) mod testing;

pub use num_bigint::BigInt;

pub use error::{AnomalyKind, DataAnomaly, Result, SettlementError};
pub use ledger::{
    Account, AssetAmounts, Ledger, MarketPosition, NetDeposit, Owner, RemainingClaim, SettlementTotals, Stage,
    SubAccount, SubAccountId,
};
pub use pipeline::{advance, Pipeline, SettlementInputs};
pub use prices::{PriceRegime, PriceTable, Prices};
pub use residual::{ResidualEntry, ResidualPools};
pub use returned::ReturnedAssets;
pub use snapshot::{BalancesSnapshot, Snapshot, SnapshotOptions};
