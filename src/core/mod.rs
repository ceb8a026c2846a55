mod engine;
mod error;
pub mod ledger;
pub mod market;
pub mod tables;
pub mod tax;
mod types;
mod validate;
pub mod waterfall;

pub use engine::{RunOptions, simulate, simulate_with_options, spending_factor};
pub use error::SimulationError;
pub use types::{
    Account, AccountCommon, BudgetTargets, FilingStatus, GlidePoint, IncomeKind, IncomeStream,
    MarketAssumptions, Owner, Person, Profile, RmdProjectionRow, SimulationResult,
    SimulationSettings, SocialSecurity, SpendingModel, YearlyResult,
};
pub use validate::{PersonTimeline, ResolvedProfile, validate_profile};
