//! Compile-time tax and distribution tables (2024 federal values).
//!
//! Dollar thresholds are in base-year dollars; callers scale them by the
//! path's cumulative price index. Social Security thresholds are never indexed.

use super::types::FilingStatus;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bracket {
    pub lower: f64,
    pub rate: f64,
}

const fn b(lower: f64, rate: f64) -> Bracket {
    Bracket { lower, rate }
}

pub const ORDINARY_SINGLE: [Bracket; 7] = [
    b(0.0, 0.10),
    b(11_600.0, 0.12),
    b(47_150.0, 0.22),
    b(100_525.0, 0.24),
    b(191_950.0, 0.32),
    b(243_725.0, 0.35),
    b(609_350.0, 0.37),
];

pub const ORDINARY_MFJ: [Bracket; 7] = [
    b(0.0, 0.10),
    b(23_200.0, 0.12),
    b(94_300.0, 0.22),
    b(201_050.0, 0.24),
    b(383_900.0, 0.32),
    b(487_450.0, 0.35),
    b(731_200.0, 0.37),
];

pub const ORDINARY_MFS: [Bracket; 7] = [
    b(0.0, 0.10),
    b(11_600.0, 0.12),
    b(47_150.0, 0.22),
    b(100_525.0, 0.24),
    b(191_950.0, 0.32),
    b(243_725.0, 0.35),
    b(365_600.0, 0.37),
];

pub const ORDINARY_HOH: [Bracket; 7] = [
    b(0.0, 0.10),
    b(16_550.0, 0.12),
    b(63_100.0, 0.22),
    b(100_500.0, 0.24),
    b(191_950.0, 0.32),
    b(243_700.0, 0.35),
    b(609_350.0, 0.37),
];

pub const LTCG_SINGLE: [Bracket; 3] = [b(0.0, 0.0), b(47_025.0, 0.15), b(518_900.0, 0.20)];
pub const LTCG_MFJ: [Bracket; 3] = [b(0.0, 0.0), b(94_050.0, 0.15), b(583_750.0, 0.20)];
pub const LTCG_MFS: [Bracket; 3] = [b(0.0, 0.0), b(47_025.0, 0.15), b(291_850.0, 0.20)];
pub const LTCG_HOH: [Bracket; 3] = [b(0.0, 0.0), b(63_000.0, 0.15), b(551_350.0, 0.20)];

pub fn ordinary_brackets(status: FilingStatus) -> &'static [Bracket] {
    match status {
        FilingStatus::Single => &ORDINARY_SINGLE,
        FilingStatus::MarriedFilingJointly => &ORDINARY_MFJ,
        FilingStatus::MarriedFilingSeparately => &ORDINARY_MFS,
        FilingStatus::HeadOfHousehold => &ORDINARY_HOH,
    }
}

pub fn capital_gains_brackets(status: FilingStatus) -> &'static [Bracket] {
    match status {
        FilingStatus::Single => &LTCG_SINGLE,
        FilingStatus::MarriedFilingJointly => &LTCG_MFJ,
        FilingStatus::MarriedFilingSeparately => &LTCG_MFS,
        FilingStatus::HeadOfHousehold => &LTCG_HOH,
    }
}

pub fn standard_deduction(status: FilingStatus) -> f64 {
    match status {
        FilingStatus::Single | FilingStatus::MarriedFilingSeparately => 14_600.0,
        FilingStatus::MarriedFilingJointly => 29_200.0,
        FilingStatus::HeadOfHousehold => 21_900.0,
    }
}

pub fn age_65_addition(status: FilingStatus) -> f64 {
    if status.is_married() { 1_550.0 } else { 1_950.0 }
}

pub fn social_security_thresholds(status: FilingStatus) -> (f64, f64) {
    match status {
        FilingStatus::Single | FilingStatus::HeadOfHousehold => (25_000.0, 34_000.0),
        FilingStatus::MarriedFilingJointly => (32_000.0, 44_000.0),
        FilingStatus::MarriedFilingSeparately => (0.0, 0.0),
    }
}

/// IRMAA tier: MAGI strictly above `magi_above` adds the monthly Part B + Part D
/// surcharge per enrolled person.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IrmaaTier {
    pub magi_above: f64,
    pub monthly_surcharge: f64,
}

const fn t(magi_above: f64, monthly_surcharge: f64) -> IrmaaTier {
    IrmaaTier {
        magi_above,
        monthly_surcharge,
    }
}

pub const IRMAA_SINGLE: [IrmaaTier; 5] = [
    t(103_000.0, 82.80),
    t(129_000.0, 208.00),
    t(161_000.0, 333.30),
    t(193_000.0, 458.50),
    t(500_000.0, 500.30),
];

pub const IRMAA_MFJ: [IrmaaTier; 5] = [
    t(206_000.0, 82.80),
    t(258_000.0, 208.00),
    t(322_000.0, 333.30),
    t(386_000.0, 458.50),
    t(750_000.0, 500.30),
];

pub const IRMAA_MFS: [IrmaaTier; 2] = [t(103_000.0, 458.50), t(397_000.0, 500.30)];

pub fn irmaa_tiers(status: FilingStatus) -> &'static [IrmaaTier] {
    match status {
        FilingStatus::Single | FilingStatus::HeadOfHousehold => &IRMAA_SINGLE,
        FilingStatus::MarriedFilingJointly => &IRMAA_MFJ,
        FilingStatus::MarriedFilingSeparately => &IRMAA_MFS,
    }
}

pub const MEDICARE_AGE: u32 = 65;
pub const RMD_START_AGE: u32 = 73;
pub const PENALTY_FREE_AGE: f64 = 59.5;

const UNIFORM_LIFETIME_FIRST_AGE: u32 = 72;

const UNIFORM_LIFETIME: [f64; 49] = [
    27.4, 26.5, 25.5, 24.6, 23.7, 22.9, 22.0, 21.1, 20.2, 19.4, // 72-81
    18.5, 17.7, 16.8, 16.0, 15.2, 14.4, 13.7, 12.9, 12.2, 11.5, // 82-91
    10.8, 10.1, 9.5, 8.9, 8.4, 7.8, 7.3, 6.8, 6.4, 6.0, // 92-101
    5.6, 5.2, 4.9, 4.6, 4.3, 4.1, 3.9, 3.7, 3.5, 3.4, // 102-111
    3.3, 3.1, 3.0, 2.9, 2.8, 2.7, 2.5, 2.3, 2.0, // 112-120
];

/// Divisor for `age`, or `None` below the table. Ages past 120 reuse the last entry.
pub fn uniform_lifetime_divisor(age: u32) -> Option<f64> {
    if age < UNIFORM_LIFETIME_FIRST_AGE {
        return None;
    }
    let idx = ((age - UNIFORM_LIFETIME_FIRST_AGE) as usize).min(UNIFORM_LIFETIME.len() - 1);
    Some(UNIFORM_LIFETIME[idx])
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StateTax {
    pub code: &'static str,
    pub rate: f64,
    pub exempts_social_security: bool,
}

const fn s(code: &'static str, rate: f64, exempts_social_security: bool) -> StateTax {
    StateTax {
        code,
        rate,
        exempts_social_security,
    }
}

/// Flat effective rates. Progressive states use an approximate mid-bracket rate.
const STATES: [StateTax; 24] = [
    s("AK", 0.0, true),
    s("AZ", 0.025, true),
    s("CA", 0.060, true),
    s("CO", 0.044, false),
    s("FL", 0.0, true),
    s("GA", 0.0539, true),
    s("IL", 0.0495, true),
    s("IN", 0.0305, true),
    s("KY", 0.040, true),
    s("MA", 0.050, true),
    s("MI", 0.0425, true),
    s("MN", 0.068, false),
    s("NC", 0.045, true),
    s("NH", 0.0, true),
    s("NV", 0.0, true),
    s("NY", 0.0585, true),
    s("OR", 0.0875, true),
    s("PA", 0.0307, true),
    s("SD", 0.0, true),
    s("TN", 0.0, true),
    s("TX", 0.0, true),
    s("UT", 0.0465, false),
    s("WA", 0.0, true),
    s("WY", 0.0, true),
];

pub fn state_tax(code: &str) -> Option<StateTax> {
    let code = code.trim();
    STATES
        .iter()
        .find(|st| st.code.eq_ignore_ascii_case(code))
        .copied()
}
