//! One year of cash-flow resolution for one path.
//!
//! Guaranteed income and forced RMDs come in first. Any remaining need is
//! met by selling from buckets in a fixed priority order, re-assessing the
//! household's whole tax bill after every step so each withdrawal is grossed
//! up for exactly the tax it causes.

use super::ledger::{Bucket, Contribution, Ledger, Slot};
use super::tax::{IncomeSummary, TaxBreakdown, TaxContext, rmd_amount};

const BISECTION_STEPS: u32 = 60;
const SHORTFALL_TOLERANCE: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OwnerYear {
    pub slot: Slot,
    pub age: u32,
    /// Below 59.5 at the start of the year.
    pub penalty_age: bool,
    pub working: bool,
    pub prior_pretax_standard: f64,
    pub prior_pretax_457b: f64,
}

#[derive(Debug, Clone)]
pub struct HouseholdYear {
    pub tax: TaxContext,
    pub spending_need: f64,
    pub wages: f64,
    pub other_taxable_income: f64,
    pub nontaxable_income: f64,
    pub social_security: f64,
    pub owners: Vec<OwnerYear>,
    /// Contributions already converted to this year's dollars.
    pub contributions: Vec<Contribution>,
    pub gain_ratio_floor_balance: f64,
}

impl HouseholdYear {
    fn owner(&self, slot: Slot) -> Option<&OwnerYear> {
        self.owners.iter().find(|o| o.slot == slot)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Withdrawals {
    pub cash: f64,
    pub pretax_457b: f64,
    pub taxable: f64,
    pub pretax_standard: f64,
    pub roth: f64,
}

impl Withdrawals {
    pub fn total(&self) -> f64 {
        self.cash + self.pretax_457b + self.taxable + self.pretax_standard + self.roth
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct YearOutcome {
    pub failed: bool,
    pub shortfall: f64,
    pub guaranteed_income: f64,
    pub rmd_required: f64,
    pub rmd_withdrawn: f64,
    pub pretax_deferred: f64,
    pub post_tax_contributed: f64,
    pub withdrawals: Withdrawals,
    pub surplus_reinvested: f64,
    pub tax: TaxBreakdown,
}

impl YearOutcome {
    pub fn total_tax(&self) -> f64 {
        self.tax.total()
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Source {
    Cash,
    Pretax(Bucket, Slot),
    Taxable,
    Roth,
}

struct YearState<'a> {
    year: &'a HouseholdYear,
    income: IncomeSummary,
    cash_in: f64,
}

impl YearState<'_> {
    fn net_cash(&self) -> f64 {
        self.cash_in - self.year.tax.total_tax(&self.income)
    }

    fn remaining_need(&self) -> f64 {
        self.year.spending_need - self.net_cash()
    }
}

pub fn run_year(ledger: &mut Ledger, year: &HouseholdYear) -> YearOutcome {
    let mut outcome = YearOutcome::default();
    let mut state = YearState {
        year,
        income: IncomeSummary {
            ordinary: year.wages.max(0.0) + year.other_taxable_income.max(0.0),
            social_security: year.social_security.max(0.0),
            ..IncomeSummary::default()
        },
        cash_in: 0.0,
    };

    let guaranteed = year.wages.max(0.0)
        + year.other_taxable_income.max(0.0)
        + year.nontaxable_income.max(0.0)
        + year.social_security.max(0.0);
    outcome.guaranteed_income = guaranteed;
    state.cash_in = guaranteed;

    outcome.pretax_deferred = apply_pretax_deferrals(ledger, year, &mut state);
    let (required, withdrawn) = apply_required_distributions(ledger, year, &mut state);
    outcome.rmd_required = required;
    outcome.rmd_withdrawn = withdrawn;

    let mut remaining = state.remaining_need();
    if remaining > 0.0 {
        for source in withdrawal_sequence(year) {
            if remaining <= SHORTFALL_TOLERANCE {
                break;
            }
            let gross = draw_from(ledger, &mut state, source, remaining);
            match source {
                Source::Cash => outcome.withdrawals.cash += gross,
                Source::Pretax(Bucket::Pretax457b, _) => outcome.withdrawals.pretax_457b += gross,
                Source::Pretax(_, _) => outcome.withdrawals.pretax_standard += gross,
                Source::Taxable => outcome.withdrawals.taxable += gross,
                Source::Roth => outcome.withdrawals.roth += gross,
            }
            remaining = state.remaining_need();
        }
    }

    if remaining > SHORTFALL_TOLERANCE {
        outcome.failed = true;
        outcome.shortfall = remaining;
    } else {
        let surplus = (-remaining).max(0.0);
        let (contributed, reinvested) = place_surplus(ledger, year, surplus);
        outcome.post_tax_contributed = contributed;
        outcome.surplus_reinvested = reinvested;
    }

    outcome.tax = year.tax.assess(&state.income);
    outcome
}

/// Pre-tax deferrals of working owners come out of wages before tax.
fn apply_pretax_deferrals(ledger: &mut Ledger, year: &HouseholdYear, state: &mut YearState) -> f64 {
    let mut wages_left = year.wages.max(0.0);
    let mut deferred = 0.0;
    for contribution in year.contributions.iter().filter(|c| c.bucket.is_pretax()) {
        let working = year.owner(contribution.slot).is_some_and(|o| o.working);
        if !working {
            continue;
        }
        let amount = contribution.annual_amount.max(0.0).min(wages_left);
        if amount <= 0.0 {
            continue;
        }
        ledger.contribute(contribution.bucket, contribution.slot, amount);
        wages_left -= amount;
        deferred += amount;
    }
    state.income.ordinary -= deferred;
    state.cash_in -= deferred;
    deferred
}

fn apply_required_distributions(
    ledger: &mut Ledger,
    year: &HouseholdYear,
    state: &mut YearState,
) -> (f64, f64) {
    let mut required_total = 0.0;
    let mut withdrawn_total = 0.0;
    for owner in &year.owners {
        let prior = owner.prior_pretax_standard + owner.prior_pretax_457b;
        let required = rmd_amount(prior, owner.age);
        if required <= 0.0 {
            continue;
        }
        required_total += required;
        let standard_share = if prior > 0.0 {
            owner.prior_pretax_standard / prior
        } else {
            1.0
        };
        let mut taken =
            ledger.withdraw_pretax(Bucket::PretaxStandard, owner.slot, required * standard_share);
        taken += ledger.withdraw_pretax(Bucket::Pretax457b, owner.slot, required - taken);
        if taken < required {
            taken += ledger.withdraw_pretax(Bucket::PretaxStandard, owner.slot, required - taken);
        }
        withdrawn_total += taken;
        state.income.ordinary += taken;
        state.cash_in += taken;
    }
    (required_total, withdrawn_total)
}

fn withdrawal_sequence(year: &HouseholdYear) -> Vec<Source> {
    let mut sequence = vec![Source::Cash];

    // 457(b) plans carry no early-withdrawal penalty, so young owners use them first.
    let young: Vec<Slot> = year
        .owners
        .iter()
        .filter(|o| o.penalty_age)
        .map(|o| o.slot)
        .collect();
    for slot in &young {
        sequence.push(Source::Pretax(Bucket::Pretax457b, *slot));
    }

    sequence.push(Source::Taxable);

    let mut pretax_owners: Vec<&OwnerYear> = year.owners.iter().collect();
    pretax_owners.sort_by_key(|o| o.penalty_age);
    for owner in pretax_owners {
        if !owner.penalty_age {
            sequence.push(Source::Pretax(Bucket::Pretax457b, owner.slot));
        }
        sequence.push(Source::Pretax(Bucket::PretaxStandard, owner.slot));
    }

    sequence.push(Source::Roth);
    sequence
}

fn capacity(ledger: &Ledger, source: Source) -> f64 {
    match source {
        Source::Cash => ledger.cash,
        Source::Pretax(Bucket::Pretax457b, slot) => ledger.pretax_457b.get(slot),
        Source::Pretax(_, slot) => ledger.pretax_standard.get(slot),
        Source::Taxable => ledger.taxable.balance,
        Source::Roth => ledger.roth,
    }
}

fn is_penalized(year: &HouseholdYear, source: Source) -> bool {
    match source {
        Source::Pretax(Bucket::PretaxStandard, slot) => {
            year.owner(slot).is_some_and(|o| o.penalty_age)
        }
        _ => false,
    }
}

fn with_gross(
    income: &IncomeSummary,
    source: Source,
    gross: f64,
    gain_ratio: f64,
    penalized: bool,
) -> IncomeSummary {
    let mut next = *income;
    match source {
        Source::Cash | Source::Roth => {}
        Source::Pretax(_, _) => {
            next.ordinary += gross;
            if penalized {
                next.penalized += gross;
            }
        }
        Source::Taxable => next.capital_gains += gross * gain_ratio,
    }
    next
}

/// Takes the smallest gross amount from `source` whose after-tax value covers
/// `target_net`, or the whole balance if it cannot. Returns the gross taken.
fn draw_from(ledger: &mut Ledger, state: &mut YearState, source: Source, target_net: f64) -> f64 {
    let available = capacity(ledger, source);
    if available <= 0.0 || target_net <= 0.0 {
        return 0.0;
    }

    let year = state.year;
    let floor = year.gain_ratio_floor_balance;
    let penalized = is_penalized(year, source);
    let gain_ratio = match source {
        Source::Taxable => {
            let full_sale = ledger.preview_taxable_sale(ledger.taxable.balance, floor);
            if full_sale.gross > 0.0 {
                full_sale.realized_gain / full_sale.gross
            } else {
                0.0
            }
        }
        _ => 0.0,
    };

    let base_tax = year.tax.total_tax(&state.income);
    let net_from_gross = |gross: f64| {
        let next = with_gross(&state.income, source, gross, gain_ratio, penalized);
        gross - (year.tax.total_tax(&next) - base_tax).max(0.0)
    };

    let gross = if net_from_gross(available) <= target_net {
        available
    } else {
        let mut lo = 0.0;
        let mut hi = available;
        for _ in 0..BISECTION_STEPS {
            let mid = (lo + hi) * 0.5;
            if net_from_gross(mid) < target_net {
                lo = mid;
            } else {
                hi = mid;
            }
        }
        hi
    };

    let taken = match source {
        Source::Cash => ledger.withdraw_cash(gross),
        Source::Roth => ledger.withdraw_roth(gross),
        Source::Pretax(bucket, slot) => ledger.withdraw_pretax(bucket, slot, gross),
        Source::Taxable => ledger.sell_taxable(gross, floor).gross,
    };
    state.income = with_gross(&state.income, source, taken, gain_ratio, penalized);
    state.cash_in += taken;
    taken
}

fn place_surplus(ledger: &mut Ledger, year: &HouseholdYear, surplus: f64) -> (f64, f64) {
    let mut left = surplus.max(0.0);
    let mut contributed = 0.0;
    for contribution in year.contributions.iter().filter(|c| !c.bucket.is_pretax()) {
        let working = year.owner(contribution.slot).is_some_and(|o| o.working);
        if !working || left <= 0.0 {
            continue;
        }
        let amount = contribution.annual_amount.max(0.0).min(left);
        ledger.contribute(contribution.bucket, contribution.slot, amount);
        left -= amount;
        contributed += amount;
    }
    ledger.deposit_taxable(left);
    (contributed, left)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::tables::state_tax;
    use crate::core::types::{Account, AccountCommon, FilingStatus, Owner};
    use proptest::prelude::{prop_assert, proptest};

    const EPS: f64 = 1e-6;

    fn assert_approx(actual: f64, expected: f64) {
        assert!(
            (actual - expected).abs() <= EPS,
            "expected {expected}, got {actual}"
        );
    }

    fn assert_approx_tol(actual: f64, expected: f64, tol: f64) {
        assert!(
            (actual - expected).abs() <= tol,
            "expected {expected}, got {actual}, tolerance {tol}"
        );
    }

    fn acct(balance: f64) -> AccountCommon {
        AccountCommon {
            balance,
            owner: Owner::Primary,
            annual_contribution: 0.0,
        }
    }

    fn context(status: FilingStatus) -> TaxContext {
        TaxContext {
            status,
            state: state_tax("TX").expect("TX is supported"),
            filers_65_plus: 0,
            price_index: 1.0,
            penalty_rate: 0.10,
        }
    }

    fn owner(age: u32) -> OwnerYear {
        OwnerYear {
            slot: Slot::Primary,
            age,
            penalty_age: (age as f64) < 59.5,
            working: false,
            prior_pretax_standard: 0.0,
            prior_pretax_457b: 0.0,
        }
    }

    fn year(need: f64, owners: Vec<OwnerYear>) -> HouseholdYear {
        HouseholdYear {
            tax: context(FilingStatus::Single),
            spending_need: need,
            wages: 0.0,
            other_taxable_income: 0.0,
            nontaxable_income: 0.0,
            social_security: 0.0,
            owners,
            contributions: Vec::new(),
            gain_ratio_floor_balance: 1.0,
        }
    }

    #[test]
    fn cash_is_drawn_first_without_tax() {
        let mut ledger = Ledger::from_accounts(
            &[
                Account::Cash(acct(10_000.0)),
                Account::Roth(acct(10_000.0)),
            ],
            0.5,
        );
        let outcome = run_year(&mut ledger, &year(4_000.0, vec![owner(60)]));
        assert!(!outcome.failed);
        assert_approx(outcome.withdrawals.cash, 4_000.0);
        assert_approx(outcome.withdrawals.roth, 0.0);
        assert_approx(outcome.total_tax(), 0.0);
        assert_approx(ledger.cash, 6_000.0);
    }

    #[test]
    fn young_owner_draws_457b_before_taxable_and_standard() {
        let mut ledger = Ledger::from_accounts(
            &[
                Account::Pretax457b(acct(50_000.0)),
                Account::TaxableBrokerage {
                    common: acct(50_000.0),
                    cost_basis: 10_000.0,
                },
                Account::PretaxStandard(acct(50_000.0)),
            ],
            0.5,
        );
        let outcome = run_year(&mut ledger, &year(20_000.0, vec![owner(50)]));
        assert!(!outcome.failed);
        assert!(outcome.withdrawals.pretax_457b > 20_000.0 - EPS);
        assert_approx(outcome.withdrawals.taxable, 0.0);
        assert_approx(outcome.withdrawals.pretax_standard, 0.0);
        assert_approx(outcome.tax.penalty, 0.0);
    }

    #[test]
    fn older_owner_uses_taxable_before_457b() {
        let mut ledger = Ledger::from_accounts(
            &[
                Account::Pretax457b(acct(50_000.0)),
                Account::TaxableBrokerage {
                    common: acct(50_000.0),
                    cost_basis: 50_000.0,
                },
            ],
            0.5,
        );
        let outcome = run_year(&mut ledger, &year(20_000.0, vec![owner(62)]));
        assert_approx_tol(outcome.withdrawals.taxable, 20_000.0, 1e-3);
        assert_approx(outcome.withdrawals.pretax_457b, 0.0);
    }

    #[test]
    fn early_standard_withdrawal_pays_penalty_and_is_grossed_up() {
        let mut ledger =
            Ledger::from_accounts(&[Account::PretaxStandard(acct(100_000.0))], 0.5);
        let outcome = run_year(&mut ledger, &year(10_000.0, vec![owner(50)]));
        // Below the standard deduction the only cost is the 10% penalty.
        assert_approx_tol(outcome.withdrawals.pretax_standard, 10_000.0 / 0.9, 1e-3);
        assert_approx_tol(outcome.tax.penalty, 10_000.0 / 9.0, 1e-3);
        assert!(!outcome.failed);
    }

    #[test]
    fn taxable_sale_pays_stacked_gains_tax() {
        let mut ledger = Ledger::from_accounts(
            &[Account::TaxableBrokerage {
                common: acct(1_000_000.0),
                cost_basis: 0.0,
            }],
            0.5,
        );
        let mut y = year(0.0, vec![owner(66)]);
        y.other_taxable_income = 600_000.0;
        let base_tax = y.tax.total_tax(&IncomeSummary {
            ordinary: 600_000.0,
            ..IncomeSummary::default()
        });
        y.spending_need = 600_000.0 - base_tax + 100_000.0;
        let outcome = run_year(&mut ledger, &y);
        assert!(!outcome.failed);
        // All gains sit in the 20% band: gross * 0.8 = 100,000.
        assert_approx_tol(outcome.withdrawals.taxable, 125_000.0, 1e-2);
        assert_approx_tol(outcome.tax.capital_gains, 25_000.0, 1e-2);
    }

    #[test]
    fn roth_is_used_last() {
        let mut ledger = Ledger::from_accounts(
            &[
                Account::Roth(acct(100_000.0)),
                Account::PretaxStandard(acct(5_000.0)),
            ],
            0.5,
        );
        let outcome = run_year(&mut ledger, &year(20_000.0, vec![owner(65)]));
        assert_approx(outcome.withdrawals.pretax_standard, 5_000.0);
        assert_approx_tol(outcome.withdrawals.roth, 15_000.0, 1e-3);
        assert!(!outcome.failed);
    }

    #[test]
    fn rmd_excess_is_reinvested_with_basis() {
        let mut ledger =
            Ledger::from_accounts(&[Account::PretaxStandard(acct(265_000.0))], 0.5);
        let mut o = owner(73);
        o.prior_pretax_standard = 265_000.0;
        let outcome = run_year(&mut ledger, &year(0.0, vec![o]));
        assert_approx(outcome.rmd_required, 10_000.0);
        assert_approx(outcome.rmd_withdrawn, 10_000.0);
        assert_approx(ledger.pretax_standard.primary, 255_000.0);
        assert!(!outcome.failed);
        // No tax under the standard deduction, so the full RMD is reinvested.
        assert_approx(outcome.surplus_reinvested, 10_000.0);
        assert_approx(ledger.taxable.balance, 10_000.0);
        assert_approx(ledger.taxable.basis, 10_000.0);
    }

    #[test]
    fn rmd_counts_toward_spending_before_other_buckets() {
        let mut ledger = Ledger::from_accounts(
            &[
                Account::PretaxStandard(acct(265_000.0)),
                Account::Cash(acct(50_000.0)),
            ],
            0.5,
        );
        let mut o = owner(73);
        o.prior_pretax_standard = 265_000.0;
        let outcome = run_year(&mut ledger, &year(12_000.0, vec![o]));
        assert_approx(outcome.rmd_withdrawn, 10_000.0);
        assert_approx(outcome.withdrawals.cash, 2_000.0);
        assert_approx(outcome.surplus_reinvested, 0.0);
    }

    #[test]
    fn exhausted_buckets_fail_the_year() {
        let mut ledger = Ledger::from_accounts(&[Account::Cash(acct(1_000.0))], 0.5);
        let outcome = run_year(&mut ledger, &year(5_000.0, vec![owner(70)]));
        assert!(outcome.failed);
        assert_approx(outcome.shortfall, 4_000.0);
        assert_approx(ledger.cash, 0.0);
    }

    #[test]
    fn guaranteed_income_surplus_goes_to_taxable() {
        let mut ledger = Ledger::default();
        let mut y = year(30_000.0, vec![owner(70)]);
        y.nontaxable_income = 35_000.0;
        let outcome = run_year(&mut ledger, &y);
        assert!(!outcome.failed);
        assert_approx(outcome.surplus_reinvested, 5_000.0);
        assert_approx(ledger.taxable.basis, 5_000.0);
    }

    #[test]
    fn pretax_deferral_reduces_taxable_wages() {
        let mut ledger = Ledger::default();
        let mut o = owner(40);
        o.working = true;
        let mut y = year(20_000.0, vec![o]);
        y.wages = 60_000.0;
        y.contributions = vec![
            Contribution {
                bucket: Bucket::PretaxStandard,
                slot: Slot::Primary,
                annual_amount: 10_000.0,
            },
            Contribution {
                bucket: Bucket::Roth,
                slot: Slot::Primary,
                annual_amount: 5_000.0,
            },
        ];
        let outcome = run_year(&mut ledger, &y);
        assert_approx(outcome.pretax_deferred, 10_000.0);
        assert_approx(ledger.pretax_standard.primary, 10_000.0);
        // 60,000 - 10,000 deferred - 14,600 deduction = 35,400 taxable.
        let expected_tax = 1_160.0 + (35_400.0 - 11_600.0) * 0.12;
        assert_approx(outcome.total_tax(), expected_tax);
        assert_approx(outcome.post_tax_contributed, 5_000.0);
        assert_approx(ledger.roth, 5_000.0);
        assert_approx(
            outcome.surplus_reinvested,
            60_000.0 - 10_000.0 - expected_tax - 20_000.0 - 5_000.0,
        );
    }

    #[test]
    fn retired_owner_makes_no_contributions() {
        let mut ledger = Ledger::default();
        let mut y = year(0.0, vec![owner(70)]);
        y.wages = 10_000.0;
        y.contributions = vec![Contribution {
            bucket: Bucket::PretaxStandard,
            slot: Slot::Primary,
            annual_amount: 5_000.0,
        }];
        let outcome = run_year(&mut ledger, &y);
        assert_approx(outcome.pretax_deferred, 0.0);
        assert_approx(ledger.pretax_standard.primary, 0.0);
    }

    #[test]
    fn spouse_rmd_uses_spouse_balance_only() {
        let mut ledger = Ledger::from_accounts(
            &[
                Account::PretaxStandard(AccountCommon {
                    balance: 265_000.0,
                    owner: Owner::Spouse,
                    annual_contribution: 0.0,
                }),
                Account::PretaxStandard(acct(100_000.0)),
            ],
            0.5,
        );
        let primary = owner(60);
        let mut spouse = owner(73);
        spouse.slot = Slot::Spouse;
        spouse.prior_pretax_standard = 265_000.0;
        let mut y = year(0.0, vec![primary, spouse]);
        y.tax = context(FilingStatus::MarriedFilingJointly);
        let outcome = run_year(&mut ledger, &y);
        assert_approx(outcome.rmd_withdrawn, 10_000.0);
        assert_approx(ledger.pretax_standard.spouse, 255_000.0);
        assert_approx(ledger.pretax_standard.primary, 100_000.0);
    }

    proptest! {
        #[test]
        fn prop_year_keeps_balances_non_negative_and_meets_need_when_solvent(
            cash in 0u32..50_000,
            taxable in 0u32..200_000,
            basis_pct in 0u32..101,
            standard in 0u32..400_000,
            f457 in 0u32..100_000,
            roth in 0u32..100_000,
            need in 0u32..150_000,
            age in 40u32..95,
            ss in 0u32..40_000,
        ) {
            let taxable = taxable as f64;
            let mut ledger = Ledger::from_accounts(
                &[
                    Account::Cash(acct(cash as f64)),
                    Account::TaxableBrokerage {
                        common: acct(taxable),
                        cost_basis: taxable * basis_pct as f64 / 100.0,
                    },
                    Account::PretaxStandard(acct(standard as f64)),
                    Account::Pretax457b(acct(f457 as f64)),
                    Account::Roth(acct(roth as f64)),
                ],
                0.5,
            );
            let mut o = owner(age);
            o.prior_pretax_standard = standard as f64;
            o.prior_pretax_457b = f457 as f64;
            let mut y = year(need as f64, vec![o]);
            y.social_security = ss as f64;
            let outcome = run_year(&mut ledger, &y);

            prop_assert!(ledger.cash >= 0.0);
            prop_assert!(ledger.taxable.balance >= 0.0);
            prop_assert!(ledger.taxable.basis <= ledger.taxable.balance + 1e-6);
            prop_assert!(ledger.pretax_standard.primary >= 0.0);
            prop_assert!(ledger.pretax_457b.primary >= 0.0);
            prop_assert!(ledger.roth >= 0.0);
            prop_assert!(outcome.rmd_withdrawn + 1e-6 >= outcome.rmd_required.min(standard as f64 + f457 as f64));
            if outcome.failed {
                prop_assert!(ledger.liquid_total() - ledger.taxable.balance < 1.0);
            }
        }
    }
}
