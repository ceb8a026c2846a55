use chrono::{Datelike, NaiveDate};

use super::error::SimulationError;
use super::tables::{StateTax, state_tax};
use super::types::{Account, FilingStatus, Owner, Profile};

const MAX_HORIZON_YEARS: u32 = 100;
const MAX_PATHS: u32 = 1_000_000;
const DAYS_PER_YEAR: f64 = 365.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersonTimeline {
    /// Whole years of age on the as-of date.
    pub age_at_start: u32,
    /// Age reached during the first simulated calendar year.
    pub age_in_start_year: u32,
    pub exact_age_at_start: f64,
    pub retirement_year: i32,
    pub life_expectancy: u32,
}

impl PersonTimeline {
    /// Age reached at some point during calendar year `start_year + year_offset`.
    pub fn age_in(&self, year_offset: u32) -> u32 {
        self.age_in_start_year + year_offset
    }

    pub fn exact_age_in(&self, year_offset: u32) -> f64 {
        self.exact_age_at_start + year_offset as f64
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedProfile {
    pub profile: Profile,
    pub state: StateTax,
    pub people: Vec<PersonTimeline>,
    pub start_year: i32,
    pub horizon_years: u32,
    pub paths: u32,
}

impl ResolvedProfile {
    pub fn primary(&self) -> &PersonTimeline {
        &self.people[0]
    }
}

pub fn validate_profile(profile: &Profile) -> Result<ResolvedProfile, SimulationError> {
    validate_with_paths(profile, None)
}

pub fn validate_with_paths(
    profile: &Profile,
    paths: Option<u32>,
) -> Result<ResolvedProfile, SimulationError> {
    let paths = paths.unwrap_or(profile.simulations);
    if paths == 0 {
        return Err(SimulationError::config("simulation count must be positive"));
    }
    if paths > MAX_PATHS {
        return Err(SimulationError::config(format!(
            "simulation count {paths} exceeds the limit of {MAX_PATHS}"
        )));
    }

    let state = state_tax(&profile.state).ok_or_else(|| {
        SimulationError::config(format!("unsupported state code `{}`", profile.state))
    })?;

    if profile.persons.is_empty() || profile.persons.len() > 2 {
        return Err(SimulationError::invalid(
            "persons",
            "a household needs one or two persons",
        ));
    }

    if profile.filing_status == FilingStatus::MarriedFilingJointly && profile.persons.len() < 2 {
        return Err(SimulationError::config(
            "filing status `mfj` needs a second person in the household",
        ));
    }

    let as_of = profile.as_of;
    let mut people = Vec::with_capacity(profile.persons.len());
    for (i, person) in profile.persons.iter().enumerate() {
        let field = |name: &str| format!("persons[{i}].{name}");
        let age = as_of.years_since(person.birth_date).ok_or_else(|| {
            SimulationError::invalid(field("birthDate"), "must be on or before asOf")
        })?;
        if person.retirement_date < person.birth_date {
            return Err(SimulationError::invalid(
                field("retirementDate"),
                "must be after the birth date",
            ));
        }
        if person.life_expectancy <= age {
            return Err(SimulationError::invalid(
                field("lifeExpectancy"),
                format!("must exceed the current age of {age}"),
            ));
        }
        if let Some(ss) = &person.social_security {
            non_negative(&field("socialSecurity.monthlyBenefit"), ss.monthly_benefit)?;
            if !(62..=70).contains(&ss.claiming_age) {
                return Err(SimulationError::invalid(
                    field("socialSecurity.claimingAge"),
                    "must be between 62 and 70",
                ));
            }
        }
        people.push(PersonTimeline {
            age_at_start: age,
            age_in_start_year: (as_of.year() - person.birth_date.year()) as u32,
            exact_age_at_start: exact_years_between(person.birth_date, as_of),
            retirement_year: person.retirement_date.year(),
            life_expectancy: person.life_expectancy,
        });
    }
    let has_spouse = people.len() > 1;

    for (i, account) in profile.accounts.iter().enumerate() {
        let common = account.common();
        non_negative(&format!("accounts[{i}].balance"), common.balance)?;
        non_negative(
            &format!("accounts[{i}].annualContribution"),
            common.annual_contribution,
        )?;
        if let Account::TaxableBrokerage { cost_basis, .. } = account {
            non_negative(&format!("accounts[{i}].costBasis"), *cost_basis)?;
            if *cost_basis > common.balance {
                return Err(SimulationError::invalid(
                    format!("accounts[{i}].costBasis"),
                    "cannot exceed the balance",
                ));
            }
        }
        if !has_spouse && common.owner != Owner::Primary {
            return Err(SimulationError::invalid(
                format!("accounts[{i}].owner"),
                format!(
                    "{} account owned by `{:?}` needs a second person",
                    account.kind_name(),
                    common.owner
                ),
            ));
        }
    }

    for (i, stream) in profile.income_streams.iter().enumerate() {
        non_negative(&format!("incomeStreams[{i}].annualAmount"), stream.annual_amount)?;
        if let Some(end) = stream.end_date
            && end < stream.start_date
        {
            return Err(SimulationError::invalid(
                format!("incomeStreams[{i}].endDate"),
                "must not be before the start date",
            ));
        }
        if !has_spouse && stream.owner != Owner::Primary {
            return Err(SimulationError::invalid(
                format!("incomeStreams[{i}].owner"),
                "needs a second person",
            ));
        }
    }

    non_negative("budget.retirementAnnual", profile.budget.retirement_annual)?;
    if let Some(pre) = profile.budget.pre_retirement_annual {
        non_negative("budget.preRetirementAnnual", pre)?;
    }

    validate_market(profile)?;
    validate_settings(profile)?;

    let start_year = as_of.year();
    let horizon_years = people
        .iter()
        .map(|p| p.life_expectancy - p.age_at_start)
        .max()
        .unwrap_or(0);
    if horizon_years == 0 || horizon_years > MAX_HORIZON_YEARS {
        return Err(SimulationError::config(format!(
            "planning horizon of {horizon_years} years is outside 1..={MAX_HORIZON_YEARS}"
        )));
    }

    Ok(ResolvedProfile {
        profile: profile.clone(),
        state,
        people,
        start_year,
        horizon_years,
        paths,
    })
}

fn validate_market(profile: &Profile) -> Result<(), SimulationError> {
    let market = &profile.market;
    unit_interval("market.stockWeight", market.stock_weight)?;
    for (name, value) in [
        ("market.stockMean", market.stock_mean),
        ("market.bondMean", market.bond_mean),
        ("market.inflationMean", market.inflation_mean),
    ] {
        if !value.is_finite() {
            return Err(SimulationError::invalid(name, "must be a finite number"));
        }
    }
    non_negative("market.stockStd", market.stock_std)?;
    non_negative("market.bondStd", market.bond_std)?;
    non_negative("market.inflationStd", market.inflation_std)?;
    if !(-1.0..=1.0).contains(&market.correlation) {
        return Err(SimulationError::invalid(
            "market.correlation",
            "must be between -1 and 1",
        ));
    }
    for (i, point) in market.glide_path.iter().enumerate() {
        unit_interval(&format!("market.glidePath[{i}].stockWeight"), point.stock_weight)?;
    }
    if market.glide_path.windows(2).any(|w| w[0].age >= w[1].age) {
        return Err(SimulationError::invalid(
            "market.glidePath",
            "ages must be strictly increasing",
        ));
    }
    Ok(())
}

fn validate_settings(profile: &Profile) -> Result<(), SimulationError> {
    let settings = &profile.settings;
    for (name, value) in [
        ("taxDragRate", settings.tax_drag_rate),
        ("jointPretaxPrimaryShare", settings.joint_pretax_primary_share),
        ("earlyWithdrawalPenaltyRate", settings.early_withdrawal_penalty_rate),
        ("failureWarningThreshold", settings.failure_warning_threshold),
    ] {
        if !(0.0..=1.0).contains(&value) {
            return Err(SimulationError::config(format!(
                "settings.{name} must be between 0 and 1, got {value}"
            )));
        }
    }
    if !settings.cash_return.is_finite() || settings.cash_return <= -1.0 {
        return Err(SimulationError::config(
            "settings.cashReturn must be greater than -1",
        ));
    }
    if !settings.gain_ratio_floor_balance.is_finite() || settings.gain_ratio_floor_balance < 0.0 {
        return Err(SimulationError::config(
            "settings.gainRatioFloorBalance must be non-negative",
        ));
    }
    Ok(())
}

fn non_negative(field: &str, value: f64) -> Result<(), SimulationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SimulationError::invalid(field, "must be a non-negative number"))
    }
}

fn unit_interval(field: &str, value: f64) -> Result<(), SimulationError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimulationError::invalid(field, "must be between 0 and 1"))
    }
}

fn exact_years_between(from: NaiveDate, to: NaiveDate) -> f64 {
    (to - from).num_days() as f64 / DAYS_PER_YEAR
}
