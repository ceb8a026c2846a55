use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::error::SimulationError;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FilingStatus {
    Single,
    #[serde(alias = "mfj", alias = "marriedFilingJointly")]
    MarriedFilingJointly,
    #[serde(alias = "mfs", alias = "marriedFilingSeparately")]
    MarriedFilingSeparately,
    #[serde(alias = "hoh", alias = "headOfHousehold")]
    HeadOfHousehold,
}

impl FilingStatus {
    pub fn is_married(self) -> bool {
        matches!(
            self,
            FilingStatus::MarriedFilingJointly | FilingStatus::MarriedFilingSeparately
        )
    }
}

impl FromStr for FilingStatus {
    type Err = SimulationError;

    fn from_str(code: &str) -> Result<Self, Self::Err> {
        match code.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "single" | "s" => Ok(FilingStatus::Single),
            "married-filing-jointly" | "mfj" | "joint" => Ok(FilingStatus::MarriedFilingJointly),
            "married-filing-separately" | "mfs" => Ok(FilingStatus::MarriedFilingSeparately),
            "head-of-household" | "hoh" => Ok(FilingStatus::HeadOfHousehold),
            _ => Err(SimulationError::config(format!(
                "unsupported filing status `{code}`"
            ))),
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SpendingModel {
    #[default]
    #[serde(alias = "constantReal", alias = "constant_real")]
    ConstantReal,
    #[serde(alias = "smileCurve", alias = "smile_curve", alias = "smile")]
    SmileCurve,
    #[serde(alias = "conservativeDecline", alias = "conservative_decline")]
    ConservativeDecline,
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Owner {
    #[default]
    Primary,
    Spouse,
    Joint,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SocialSecurity {
    pub monthly_benefit: f64,
    pub claiming_age: u32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Person {
    #[serde(default)]
    pub name: Option<String>,
    pub birth_date: NaiveDate,
    pub retirement_date: NaiveDate,
    #[serde(default)]
    pub social_security: Option<SocialSecurity>,
    #[serde(default = "default_life_expectancy")]
    pub life_expectancy: u32,
}

fn default_life_expectancy() -> u32 {
    95
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Account {
    Cash(AccountCommon),
    #[serde(rename_all = "camelCase")]
    TaxableBrokerage {
        #[serde(flatten)]
        common: AccountCommon,
        cost_basis: f64,
    },
    PretaxStandard(AccountCommon),
    #[serde(rename = "pretax-457b")]
    Pretax457b(AccountCommon),
    Roth(AccountCommon),
    HomeEquity(AccountCommon),
}

#[derive(Debug, Clone, PartialEq, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountCommon {
    pub balance: f64,
    #[serde(default)]
    pub owner: Owner,
    #[serde(default)]
    pub annual_contribution: f64,
}

impl Account {
    pub fn common(&self) -> &AccountCommon {
        match self {
            Account::Cash(c)
            | Account::PretaxStandard(c)
            | Account::Pretax457b(c)
            | Account::Roth(c)
            | Account::HomeEquity(c) => c,
            Account::TaxableBrokerage { common, .. } => common,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            Account::Cash(_) => "cash",
            Account::TaxableBrokerage { .. } => "taxable-brokerage",
            Account::PretaxStandard(_) => "pretax-standard",
            Account::Pretax457b(_) => "pretax-457b",
            Account::Roth(_) => "roth",
            Account::HomeEquity(_) => "home-equity",
        }
    }
}

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum IncomeKind {
    Salary,
    Pension,
    Annuity,
    Rental,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IncomeStream {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: IncomeKind,
    pub annual_amount: f64,
    #[serde(default)]
    pub owner: Owner,
    pub start_date: NaiveDate,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub inflation_adjusted: bool,
    #[serde(default = "default_true")]
    pub taxable: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetTargets {
    pub retirement_annual: f64,
    #[serde(default)]
    pub pre_retirement_annual: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GlidePoint {
    pub age: u32,
    pub stock_weight: f64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketAssumptions {
    pub stock_weight: f64,
    pub stock_mean: f64,
    pub stock_std: f64,
    pub bond_mean: f64,
    pub bond_std: f64,
    pub inflation_mean: f64,
    pub inflation_std: f64,
    #[serde(default = "default_correlation")]
    pub correlation: f64,
    #[serde(default)]
    pub glide_path: Vec<GlidePoint>,
}

fn default_correlation() -> f64 {
    0.3
}

impl Default for MarketAssumptions {
    fn default() -> Self {
        Self {
            stock_weight: 0.6,
            stock_mean: 0.10,
            stock_std: 0.18,
            bond_mean: 0.045,
            bond_std: 0.06,
            inflation_mean: 0.025,
            inflation_std: 0.012,
            correlation: default_correlation(),
            glide_path: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SimulationSettings {
    /// Share of positive taxable-bucket returns lost to annual distributions.
    pub tax_drag_rate: f64,
    /// Share of jointly owned pre-tax balances attributed to the primary person
    /// for RMD and early-withdrawal purposes.
    pub joint_pretax_primary_share: f64,
    pub cash_return: f64,
    pub early_withdrawal_penalty_rate: f64,
    pub failure_warning_threshold: f64,
    /// Taxable balances below this are treated as having no unrealized gain.
    pub gain_ratio_floor_balance: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            tax_drag_rate: 0.15,
            joint_pretax_primary_share: 0.5,
            cash_return: 0.01,
            early_withdrawal_penalty_rate: 0.10,
            failure_warning_threshold: 0.10,
            gain_ratio_floor_balance: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub as_of: NaiveDate,
    pub persons: Vec<Person>,
    #[serde(default)]
    pub accounts: Vec<Account>,
    #[serde(default)]
    pub income_streams: Vec<IncomeStream>,
    pub budget: BudgetTargets,
    #[serde(default)]
    pub spending_model: SpendingModel,
    #[serde(default)]
    pub market: MarketAssumptions,
    pub filing_status: FilingStatus,
    pub state: String,
    #[serde(default = "default_simulations")]
    pub simulations: u32,
    #[serde(default)]
    pub settings: SimulationSettings,
}

fn default_simulations() -> u32 {
    10_000
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct YearlyResult {
    pub year: i32,
    pub age: u32,
    pub p5_balance: f64,
    pub median_balance: f64,
    pub p95_balance: f64,
    pub median_tax: f64,
    pub failure_rate_to_date: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RmdProjectionRow {
    pub year: i32,
    pub age: u32,
    pub start_balance: f64,
    pub rmd_amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationResult {
    /// Percentage of paths that met spending through the horizon, 0-100.
    pub success_rate: f64,
    pub median_ending_balance: f64,
    pub p5_ending_balance: f64,
    pub p95_ending_balance: f64,
    pub years: Vec<YearlyResult>,
    pub rmd_projection: Vec<RmdProjectionRow>,
    pub warnings: Vec<String>,
    pub paths: u32,
    pub seed_used: u64,
}
