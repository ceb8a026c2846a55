use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{Months, NaiveDate};
use rayon::prelude::*;
use tracing::{debug, info};

use super::error::SimulationError;
use super::ledger::{Contribution, Ledger, OwnerSplit, Slot, contributions_from_accounts};
use super::market::{ReturnGenerator, derive_seed, stock_weight_at};
use super::tables::{PENALTY_FREE_AGE, RMD_START_AGE};
use super::tax::{IncomeSummary, TaxContext, irmaa_annual_surcharge, is_medicare_eligible};
use super::types::{
    FilingStatus, IncomeKind, Owner, Profile, RmdProjectionRow, SimulationResult, SpendingModel, YearlyResult,
};
use super::validate::{ResolvedProfile, validate_with_paths};
use super::waterfall::{HouseholdYear, OwnerYear, run_year};

/// Knobs for a single run. `paths` overrides the profile's simulation count.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    pub paths: Option<u32>,
    pub seed: Option<u64>,
    /// Checked between simulated years; raising it aborts the run.
    pub cancel: Option<Arc<AtomicBool>>,
}

pub fn simulate(
    profile: &Profile,
    paths: Option<u32>,
    seed: Option<u64>,
) -> Result<SimulationResult, SimulationError> {
    simulate_with_options(
        profile,
        &RunOptions {
            paths,
            seed,
            cancel: None,
        },
    )
}

pub fn simulate_with_options(
    profile: &Profile,
    options: &RunOptions,
) -> Result<SimulationResult, SimulationError> {
    let started = Instant::now();
    let resolved = validate_with_paths(profile, options.paths)?;

    let seed = match options.seed {
        Some(seed) => seed,
        None => {
            let seed = rand::random::<u64>();
            debug!(seed, "no seed supplied; drew a fresh base seed");
            seed
        }
    };
    let cancel = options.cancel.as_deref();

    let outcomes = (0..resolved.paths)
        .into_par_iter()
        .map(|path_index| simulate_path(&resolved, seed, path_index, cancel))
        .collect::<Result<Vec<_>, _>>()?;

    let clamp_events: u32 = outcomes.iter().map(|o| o.clamp_events).sum();
    if clamp_events > 0 {
        debug!(
            clamp_events,
            "clamped negative balances caused by floating-point drift"
        );
    }

    let result = summarize(&resolved, &outcomes, seed);
    info!(
        paths = resolved.paths,
        years = resolved.horizon_years,
        seed,
        success_rate = result.success_rate,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "simulation finished"
    );
    Ok(result)
}

/// Real-spending multiplier for the `years_into_retirement`-th retirement year.
pub fn spending_factor(model: SpendingModel, years_into_retirement: u32) -> f64 {
    match model {
        SpendingModel::ConstantReal => 1.0,
        SpendingModel::SmileCurve => {
            let declining = years_into_retirement.clamp(10, 20) - 10;
            let rising = years_into_retirement.saturating_sub(20);
            0.98_f64.powi(declining as i32) * 1.01_f64.powi(rising as i32)
        }
        SpendingModel::ConservativeDecline => {
            0.99_f64.powi(years_into_retirement as i32).max(0.70)
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct YearSnapshot {
    liquid_real: f64,
    tax_real: f64,
    pretax_start_real: f64,
    rmd_real: f64,
    irmaa_real: f64,
}

#[derive(Debug, Clone, PartialEq)]
struct PathOutcome {
    snapshots: Vec<YearSnapshot>,
    failed_year: Option<u32>,
    paid_penalty: bool,
    clamp_events: u32,
}

#[derive(Debug, Clone, Copy)]
struct PriorPretax {
    standard: OwnerSplit,
    pretax_457b: OwnerSplit,
}

impl PriorPretax {
    fn capture(ledger: &Ledger) -> Self {
        Self {
            standard: ledger.pretax_standard,
            pretax_457b: ledger.pretax_457b,
        }
    }

    fn total(&self) -> f64 {
        self.standard.total() + self.pretax_457b.total()
    }
}

fn simulate_path(
    resolved: &ResolvedProfile,
    base_seed: u64,
    path_index: u32,
    cancel: Option<&AtomicBool>,
) -> Result<PathOutcome, SimulationError> {
    let profile = &resolved.profile;
    let settings = &profile.settings;
    let schedule = contributions_from_accounts(&profile.accounts);
    let mut ledger = Ledger::from_accounts(&profile.accounts, settings.joint_pretax_primary_share);
    let mut returns = ReturnGenerator::new(&profile.market, derive_seed(base_seed, path_index));

    let mut outcome = PathOutcome {
        snapshots: Vec::with_capacity(resolved.horizon_years as usize),
        failed_year: None,
        paid_penalty: false,
        clamp_events: 0,
    };
    let mut price_index = 1.0;
    let mut prior_magi = opening_magi(resolved, &schedule, &ledger);

    for offset in 0..resolved.horizon_years {
        if cancel.is_some_and(|flag| flag.load(Ordering::Relaxed)) {
            return Err(SimulationError::Cancelled);
        }

        let prior = PriorPretax::capture(&ledger);
        let weight = stock_weight_at(&profile.market, resolved.primary().age_in(offset));
        let sample = returns.sample(weight);
        let end_index = price_index * (1.0 + sample.inflation);

        if outcome.failed_year.is_some() {
            outcome.snapshots.push(YearSnapshot::default());
            price_index = end_index;
            continue;
        }

        ledger.grow(sample.portfolio_return, sample.inflation, settings);
        let plan = plan_year(resolved, offset, price_index, prior_magi, &prior, &schedule);
        let year = run_year(&mut ledger, &plan.household);
        if year.failed {
            ledger.lock_depleted();
            outcome.failed_year = Some(offset);
        }
        outcome.paid_penalty |= year.tax.penalty > 0.0;
        outcome.clamp_events += ledger.take_clamp_events();
        prior_magi = year.tax.magi;

        outcome.snapshots.push(YearSnapshot {
            liquid_real: ledger.liquid_total() / end_index,
            tax_real: year.total_tax() / price_index,
            pretax_start_real: prior.total() / price_index,
            rmd_real: year.rmd_required / price_index,
            irmaa_real: plan.irmaa / price_index,
        });
        price_index = end_index;
    }

    Ok(outcome)
}

/// MAGI for the year before the run, estimated from the first year's
/// scheduled income. Portfolio withdrawals are not known yet and count as zero.
fn opening_magi(resolved: &ResolvedProfile, schedule: &[Contribution], ledger: &Ledger) -> f64 {
    let plan = plan_year(resolved, 0, 1.0, 0.0, &PriorPretax::capture(ledger), schedule);
    let household = &plan.household;
    let deferred: f64 = household
        .contributions
        .iter()
        .filter(|c| c.bucket.is_pretax())
        .map(|c| c.annual_amount)
        .sum();
    let income = IncomeSummary {
        ordinary: (household.wages - deferred).max(0.0) + household.other_taxable_income,
        social_security: household.social_security,
        ..IncomeSummary::default()
    };
    household.tax.assess(&income).magi
}

struct YearPlan {
    household: HouseholdYear,
    irmaa: f64,
}

fn plan_year(
    resolved: &ResolvedProfile,
    offset: u32,
    price_index: f64,
    prior_magi: f64,
    prior: &PriorPretax,
    schedule: &[Contribution],
) -> YearPlan {
    let profile = &resolved.profile;
    let year = resolved.start_year + offset as i32;

    let mut owners = Vec::with_capacity(resolved.people.len());
    let mut working = OwnerSplit::default();
    let mut social_security = 0.0;
    let mut medicare_enrolled = 0;
    let mut filers_65_plus = 0;
    for ((person, timeline), slot) in profile.persons.iter().zip(&resolved.people).zip(Slot::BOTH)
    {
        let age = timeline.age_in(offset);
        let working_share = year_fraction(year, None, Some(person.retirement_date));
        *working.get_mut(slot) = working_share;
        if let Some(ss) = &person.social_security {
            let claimed_from = person
                .birth_date
                .checked_add_months(Months::new(ss.claiming_age * 12));
            let share = claimed_from.map_or(0.0, |from| year_fraction(year, Some(from), None));
            social_security += ss.monthly_benefit * 12.0 * share * price_index;
        }
        if is_medicare_eligible(age) {
            medicare_enrolled += 1;
            // Only the filers on the return get the age-65 deduction.
            if slot == Slot::Primary || profile.filing_status == FilingStatus::MarriedFilingJointly
            {
                filers_65_plus += 1;
            }
        }
        owners.push(OwnerYear {
            slot,
            age,
            penalty_age: timeline.exact_age_in(offset) < PENALTY_FREE_AGE,
            working: working_share > 0.0,
            prior_pretax_standard: prior.standard.get(slot),
            prior_pretax_457b: prior.pretax_457b.get(slot),
        });
    }

    let mut wages = 0.0;
    let mut other_taxable_income = 0.0;
    let mut nontaxable_income = 0.0;
    for stream in &profile.income_streams {
        let owner_index = usize::from(stream.owner == Owner::Spouse);
        let end = stream.end_date.or_else(|| match stream.kind {
            IncomeKind::Salary => profile
                .persons
                .get(owner_index)
                .map(|person| person.retirement_date),
            _ => None,
        });
        let share = year_fraction(year, Some(stream.start_date), end);
        if share <= 0.0 {
            continue;
        }
        let indexation = if stream.inflation_adjusted { price_index } else { 1.0 };
        let amount = stream.annual_amount * share * indexation;
        match (stream.kind, stream.taxable) {
            (_, false) => nontaxable_income += amount,
            (IncomeKind::Salary, true) => wages += amount,
            (_, true) => other_taxable_income += amount,
        }
    }

    let contributions = schedule
        .iter()
        .filter_map(|c| {
            let share = working.get(c.slot);
            (share > 0.0).then(|| Contribution {
                annual_amount: c.annual_amount * price_index * share,
                ..*c
            })
        })
        .collect();

    let primary = resolved.primary();
    let budget = &profile.budget;
    let real_spending = if year < primary.retirement_year {
        budget
            .pre_retirement_annual
            .unwrap_or(budget.retirement_annual)
    } else {
        let years_retired = (year - primary.retirement_year) as u32;
        budget.retirement_annual * spending_factor(profile.spending_model, years_retired)
    };

    let irmaa = irmaa_annual_surcharge(
        prior_magi,
        profile.filing_status,
        medicare_enrolled,
        price_index,
    );

    let household = HouseholdYear {
        tax: TaxContext {
            status: profile.filing_status,
            state: resolved.state,
            filers_65_plus,
            price_index,
            penalty_rate: profile.settings.early_withdrawal_penalty_rate,
        },
        spending_need: real_spending * price_index + irmaa,
        wages,
        other_taxable_income,
        nontaxable_income,
        social_security,
        owners,
        contributions,
        gain_ratio_floor_balance: profile.settings.gain_ratio_floor_balance,
    };
    YearPlan { household, irmaa }
}

/// Share of calendar `year` covered by `[start, end)`; open ends are unbounded.
fn year_fraction(year: i32, start: Option<NaiveDate>, end: Option<NaiveDate>) -> f64 {
    let (Some(first), Some(next)) = (
        NaiveDate::from_ymd_opt(year, 1, 1),
        NaiveDate::from_ymd_opt(year + 1, 1, 1),
    ) else {
        return 0.0;
    };
    let lo = start.map_or(first, |s| s.max(first));
    let hi = end.map_or(next, |e| e.min(next));
    if hi <= lo {
        return 0.0;
    }
    (hi - lo).num_days() as f64 / (next - first).num_days() as f64
}

struct YearlyAccumulator {
    liquid: Vec<Vec<f64>>,
    tax: Vec<Vec<f64>>,
    pretax_start: Vec<Vec<f64>>,
    rmd: Vec<Vec<f64>>,
    irmaa: Vec<Vec<f64>>,
    failed_by: Vec<u32>,
}

impl YearlyAccumulator {
    fn new(year_count: usize, expected_samples: usize) -> Self {
        let make = || {
            (0..year_count)
                .map(|_| Vec::with_capacity(expected_samples))
                .collect::<Vec<_>>()
        };

        Self {
            liquid: make(),
            tax: make(),
            pretax_start: make(),
            rmd: make(),
            irmaa: make(),
            failed_by: vec![0; year_count],
        }
    }

    fn push(&mut self, path: &PathOutcome) {
        for (idx, snap) in path.snapshots.iter().enumerate() {
            self.liquid[idx].push(snap.liquid_real);
            self.tax[idx].push(snap.tax_real);
            self.pretax_start[idx].push(snap.pretax_start_real);
            self.rmd[idx].push(snap.rmd_real);
            self.irmaa[idx].push(snap.irmaa_real);
        }
        if let Some(failed_at) = path.failed_year {
            for count in self.failed_by.iter_mut().skip(failed_at as usize) {
                *count += 1;
            }
        }
    }
}

fn summarize(resolved: &ResolvedProfile, outcomes: &[PathOutcome], seed: u64) -> SimulationResult {
    let year_count = resolved.horizon_years as usize;
    let path_count = outcomes.len().max(1) as f64;
    let primary = resolved.primary();
    let settings = &resolved.profile.settings;

    let mut acc = YearlyAccumulator::new(year_count, outcomes.len());
    for outcome in outcomes {
        acc.push(outcome);
    }

    let mut years = Vec::with_capacity(year_count);
    let mut rmd_projection = Vec::new();
    let mut first_irmaa_year = None;
    for idx in 0..year_count {
        let offset = idx as u32;
        let year = resolved.start_year + idx as i32;
        let age = primary.age_in(offset);
        years.push(YearlyResult {
            year,
            age,
            p5_balance: percentile(&mut acc.liquid[idx], 5.0),
            median_balance: percentile(&mut acc.liquid[idx], 50.0),
            p95_balance: percentile(&mut acc.liquid[idx], 95.0),
            median_tax: percentile(&mut acc.tax[idx], 50.0),
            failure_rate_to_date: acc.failed_by[idx] as f64 / path_count,
        });
        if age >= RMD_START_AGE {
            rmd_projection.push(RmdProjectionRow {
                year,
                age,
                start_balance: percentile(&mut acc.pretax_start[idx], 50.0),
                rmd_amount: percentile(&mut acc.rmd[idx], 50.0),
            });
        }
        if first_irmaa_year.is_none() && percentile(&mut acc.irmaa[idx], 50.0) > 0.0 {
            first_irmaa_year = Some((year, age));
        }
    }

    let failed = outcomes.iter().filter(|o| o.failed_year.is_some()).count() as f64;
    let penalized = outcomes.iter().filter(|o| o.paid_penalty).count() as f64;

    let mut warnings = Vec::new();
    let threshold = settings.failure_warning_threshold;
    if let Some(row) = years.iter().find(|r| r.failure_rate_to_date > threshold) {
        warnings.push(format!(
            "{:.1}% of paths are depleted by {} (age {}), above the {:.1}% warning threshold",
            row.failure_rate_to_date * 100.0,
            row.year,
            row.age,
            threshold * 100.0
        ));
    }
    if penalized > 0.0 {
        warnings.push(format!(
            "{:.1}% of paths pay the early-withdrawal penalty on pre-tax withdrawals",
            penalized / path_count * 100.0
        ));
    }
    if let Some((year, age)) = first_irmaa_year {
        warnings.push(format!(
            "median path pays Medicare IRMAA surcharges from {year} (age {age})"
        ));
    }

    let last = years.last();
    SimulationResult {
        success_rate: (path_count - failed) / path_count * 100.0,
        median_ending_balance: last.map_or(0.0, |r| r.median_balance),
        p5_ending_balance: last.map_or(0.0, |r| r.p5_balance),
        p95_ending_balance: last.map_or(0.0, |r| r.p95_balance),
        years,
        rmd_projection,
        warnings,
        paths: resolved.paths,
        seed_used: seed,
    }
}

fn percentile(values: &mut [f64], p: f64) -> f64 {
    if values.is_empty() {
        return 0.0;
    }

    values.sort_by(|a, b| a.total_cmp(b));

    let n = values.len();
    if n == 1 {
        return values[0];
    }

    let rank = (p / 100.0) * (n as f64 - 1.0);
    let lower = rank.floor() as usize;
    let upper = rank.ceil() as usize;

    if lower == upper {
        values[lower]
    } else {
        let w = rank - lower as f64;
        values[lower] * (1.0 - w) + values[upper] * w
    }
}
