use super::tables::{
    self, Bracket, MEDICARE_AGE, RMD_START_AGE, StateTax, capital_gains_brackets,
    irmaa_tiers, ordinary_brackets, social_security_thresholds,
};
use super::types::FilingStatus;

pub fn progressive_tax(taxable: f64, brackets: &[Bracket], index: f64) -> f64 {
    let taxable = taxable.max(0.0);
    let mut tax = 0.0;
    for (i, bracket) in brackets.iter().enumerate() {
        let lower = bracket.lower * index;
        if taxable <= lower {
            break;
        }
        let upper = brackets
            .get(i + 1)
            .map(|next| next.lower * index)
            .unwrap_or(f64::INFINITY);
        tax += (taxable.min(upper) - lower) * bracket.rate;
    }
    tax
}

pub fn standard_deduction(status: FilingStatus, filers_65_plus: u32, index: f64) -> f64 {
    (tables::standard_deduction(status) + tables::age_65_addition(status) * filers_65_plus as f64)
        * index
}

/// Federal tax on ordinary income that has already had the deduction applied.
pub fn ordinary_income_tax(taxable_ordinary: f64, status: FilingStatus, index: f64) -> f64 {
    progressive_tax(taxable_ordinary, ordinary_brackets(status), index)
}

/// Long-term gains tax with the gains stacked on top of ordinary taxable income.
///
/// A bracket contributes `max(0, min(upper, total) - max(lower, ordinary))` of
/// taxable gain, so the portion of a bracket already filled by ordinary income
/// is never taxed again at the gains rate.
pub fn capital_gains_tax(
    taxable_ordinary: f64,
    taxable_gains: f64,
    status: FilingStatus,
    index: f64,
) -> f64 {
    let ordinary = taxable_ordinary.max(0.0);
    let gains = taxable_gains.max(0.0);
    if gains <= 0.0 {
        return 0.0;
    }
    let total = ordinary + gains;
    let brackets = capital_gains_brackets(status);

    let mut tax = 0.0;
    for (i, bracket) in brackets.iter().enumerate() {
        let lower = bracket.lower * index;
        let upper = brackets
            .get(i + 1)
            .map(|next| next.lower * index)
            .unwrap_or(f64::INFINITY);
        let width = (upper.min(total) - lower.max(ordinary)).max(0.0);
        if width > 0.0 {
            tax += width * bracket.rate;
        }
    }
    tax
}

pub fn provisional_income(agi_excluding_ss: f64, tax_exempt_interest: f64, benefit: f64) -> f64 {
    agi_excluding_ss.max(0.0) + tax_exempt_interest.max(0.0) + 0.5 * benefit.max(0.0)
}

pub fn taxable_social_security_from_provisional(
    provisional: f64,
    benefit: f64,
    thresholds: (f64, f64),
) -> f64 {
    let benefit = benefit.max(0.0);
    let (t1, t2) = thresholds;
    if benefit <= 0.0 || provisional <= t1 {
        0.0
    } else if provisional <= t2 {
        (0.5 * benefit).min(0.5 * (provisional - t1))
    } else {
        (0.85 * benefit).min(0.5 * (t2 - t1) + 0.85 * (provisional - t2))
    }
}

pub fn taxable_social_security(
    agi_excluding_ss: f64,
    tax_exempt_interest: f64,
    benefit: f64,
    status: FilingStatus,
) -> f64 {
    let provisional = provisional_income(agi_excluding_ss, tax_exempt_interest, benefit);
    taxable_social_security_from_provisional(provisional, benefit, social_security_thresholds(status))
}

pub fn rmd_amount(prior_year_end_balance: f64, age: u32) -> f64 {
    if age < RMD_START_AGE || prior_year_end_balance <= 0.0 {
        return 0.0;
    }
    match tables::uniform_lifetime_divisor(age) {
        Some(divisor) => prior_year_end_balance / divisor,
        None => 0.0,
    }
}

/// `magi` must already contain only the taxable part of Social Security.
pub fn irmaa_monthly_surcharge(magi: f64, status: FilingStatus, index: f64) -> f64 {
    irmaa_tiers(status)
        .iter()
        .rev()
        .find(|tier| magi > tier.magi_above * index)
        .map(|tier| tier.monthly_surcharge * index)
        .unwrap_or(0.0)
}

pub fn irmaa_annual_surcharge(
    magi: f64,
    status: FilingStatus,
    enrolled_persons: u32,
    index: f64,
) -> f64 {
    12.0 * irmaa_monthly_surcharge(magi, status, index) * enrolled_persons as f64
}

pub fn is_medicare_eligible(age: u32) -> bool {
    age >= MEDICARE_AGE
}

/// Taxable-bucket return after annual distribution taxes. Only gains are dragged.
pub fn apply_tax_drag(raw_return: f64, drag_rate: f64) -> f64 {
    if raw_return > 0.0 {
        raw_return * (1.0 - drag_rate.clamp(0.0, 1.0))
    } else {
        raw_return
    }
}

/// Unrealized gain as a share of balance, in `[0, 1]`. Balances under
/// `floor_balance` report zero so tiny remnants never divide by near-zero.
pub fn gain_ratio(balance: f64, basis: f64, floor_balance: f64) -> f64 {
    if balance < floor_balance.max(f64::MIN_POSITIVE) {
        return 0.0;
    }
    ((balance - basis) / balance).clamp(0.0, 1.0)
}

pub fn state_income_tax(state: &StateTax, federal_taxable_income: f64, taxable_ss: f64) -> f64 {
    let base = if state.exempts_social_security {
        federal_taxable_income - taxable_ss
    } else {
        federal_taxable_income
    };
    base.max(0.0) * state.rate
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IncomeSummary {
    /// Wages, pensions and pre-tax withdrawals. Excludes Social Security.
    pub ordinary: f64,
    pub social_security: f64,
    pub tax_exempt_interest: f64,
    pub capital_gains: f64,
    pub penalized: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TaxBreakdown {
    pub taxable_social_security: f64,
    pub agi: f64,
    pub magi: f64,
    pub taxable_ordinary: f64,
    pub taxable_gains: f64,
    pub federal_ordinary: f64,
    pub capital_gains: f64,
    pub state: f64,
    pub penalty: f64,
}

impl TaxBreakdown {
    pub fn total(&self) -> f64 {
        self.federal_ordinary + self.capital_gains + self.state + self.penalty
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TaxContext {
    pub status: FilingStatus,
    pub state: StateTax,
    pub filers_65_plus: u32,
    pub price_index: f64,
    pub penalty_rate: f64,
}

impl TaxContext {
    pub fn assess(&self, income: &IncomeSummary) -> TaxBreakdown {
        let index = self.price_index;
        let ordinary = income.ordinary.max(0.0);
        let gains = income.capital_gains.max(0.0);

        let taxable_ss = taxable_social_security(
            ordinary + gains,
            income.tax_exempt_interest,
            income.social_security,
            self.status,
        );
        let agi = ordinary + gains + taxable_ss;
        let magi = agi + income.tax_exempt_interest.max(0.0);

        let deduction = standard_deduction(self.status, self.filers_65_plus, index);
        let ordinary_agi = ordinary + taxable_ss;
        let taxable_ordinary = (ordinary_agi - deduction).max(0.0);
        let unused_deduction = (deduction - ordinary_agi).max(0.0);
        let taxable_gains = (gains - unused_deduction).max(0.0);

        let federal_ordinary = ordinary_income_tax(taxable_ordinary, self.status, index);
        let capital_gains = capital_gains_tax(taxable_ordinary, taxable_gains, self.status, index);
        let state = state_income_tax(&self.state, taxable_ordinary + taxable_gains, taxable_ss);
        let penalty = income.penalized.max(0.0) * self.penalty_rate;

        TaxBreakdown {
            taxable_social_security: taxable_ss,
            agi,
            magi,
            taxable_ordinary,
            taxable_gains,
            federal_ordinary,
            capital_gains,
            state,
            penalty,
        }
    }

    pub fn total_tax(&self, income: &IncomeSummary) -> f64 {
        self.assess(income).total()
    }
}
