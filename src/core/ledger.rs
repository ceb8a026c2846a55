use super::tax::{apply_tax_drag, gain_ratio};
use super::types::{Account, Owner, SimulationSettings};

/// Person a pre-tax dollar is attributed to.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Slot {
    Primary,
    Spouse,
}

impl Slot {
    pub const BOTH: [Slot; 2] = [Slot::Primary, Slot::Spouse];
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Bucket {
    Cash,
    Taxable,
    PretaxStandard,
    Pretax457b,
    Roth,
    HomeEquity,
}

impl Bucket {
    pub fn of(account: &Account) -> Self {
        match account {
            Account::Cash(_) => Bucket::Cash,
            Account::TaxableBrokerage { .. } => Bucket::Taxable,
            Account::PretaxStandard(_) => Bucket::PretaxStandard,
            Account::Pretax457b(_) => Bucket::Pretax457b,
            Account::Roth(_) => Bucket::Roth,
            Account::HomeEquity(_) => Bucket::HomeEquity,
        }
    }

    pub fn is_pretax(self) -> bool {
        matches!(self, Bucket::PretaxStandard | Bucket::Pretax457b)
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct OwnerSplit {
    pub primary: f64,
    pub spouse: f64,
}

impl OwnerSplit {
    pub fn get(&self, slot: Slot) -> f64 {
        match slot {
            Slot::Primary => self.primary,
            Slot::Spouse => self.spouse,
        }
    }

    pub fn get_mut(&mut self, slot: Slot) -> &mut f64 {
        match slot {
            Slot::Primary => &mut self.primary,
            Slot::Spouse => &mut self.spouse,
        }
    }

    pub fn total(&self) -> f64 {
        self.primary + self.spouse
    }

    fn add_owned(&mut self, owner: Owner, amount: f64, joint_primary_share: f64) {
        match owner {
            Owner::Primary => self.primary += amount,
            Owner::Spouse => self.spouse += amount,
            Owner::Joint => {
                let share = joint_primary_share.clamp(0.0, 1.0);
                self.primary += amount * share;
                self.spouse += amount * (1.0 - share);
            }
        }
    }

    fn scale(&mut self, factor: f64) {
        self.primary *= factor;
        self.spouse *= factor;
    }
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TaxableBucket {
    pub balance: f64,
    pub basis: f64,
}

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct TaxableSale {
    pub gross: f64,
    pub realized_gain: f64,
}

/// A scheduled yearly contribution. Built in today's dollars; the engine
/// restates it in nominal dollars each year.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Contribution {
    pub bucket: Bucket,
    pub slot: Slot,
    pub annual_amount: f64,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Ledger {
    pub cash: f64,
    pub taxable: TaxableBucket,
    pub pretax_standard: OwnerSplit,
    pub pretax_457b: OwnerSplit,
    pub roth: f64,
    pub home_equity: f64,
    clamp_events: u32,
}

impl Ledger {
    pub fn from_accounts(accounts: &[Account], joint_primary_share: f64) -> Self {
        let mut ledger = Ledger::default();
        for account in accounts {
            let common = account.common();
            let balance = common.balance.max(0.0);
            match account {
                Account::Cash(_) => ledger.cash += balance,
                Account::TaxableBrokerage { cost_basis, .. } => {
                    ledger.taxable.balance += balance;
                    ledger.taxable.basis += cost_basis.clamp(0.0, balance);
                }
                Account::PretaxStandard(_) => {
                    ledger
                        .pretax_standard
                        .add_owned(common.owner, balance, joint_primary_share)
                }
                Account::Pretax457b(_) => {
                    ledger
                        .pretax_457b
                        .add_owned(common.owner, balance, joint_primary_share)
                }
                Account::Roth(_) => ledger.roth += balance,
                Account::HomeEquity(_) => ledger.home_equity += balance,
            }
        }
        ledger
    }

    /// Liquid, spendable assets. Home equity is excluded.
    pub fn liquid_total(&self) -> f64 {
        self.cash
            + self.taxable.balance
            + self.pretax_standard.total()
            + self.pretax_457b.total()
            + self.roth
    }

    pub fn pretax_total(&self) -> f64 {
        self.pretax_standard.total() + self.pretax_457b.total()
    }

    pub fn pretax_for(&self, slot: Slot) -> f64 {
        self.pretax_standard.get(slot) + self.pretax_457b.get(slot)
    }

    /// One year of market growth. The taxable bucket only keeps the after-drag
    /// share of a positive return.
    pub fn grow(&mut self, portfolio_return: f64, inflation: f64, settings: &SimulationSettings) {
        let invested = 1.0 + portfolio_return;
        let taxable_growth = 1.0 + apply_tax_drag(portfolio_return, settings.tax_drag_rate);

        self.cash *= 1.0 + settings.cash_return;
        self.taxable.balance *= taxable_growth;
        self.pretax_standard.scale(invested);
        self.pretax_457b.scale(invested);
        self.roth *= invested;
        self.home_equity *= 1.0 + inflation;
        self.clamp_negatives();
    }

    pub fn withdraw_cash(&mut self, amount: f64) -> f64 {
        let taken = amount.max(0.0).min(self.cash);
        self.cash -= taken;
        taken
    }

    pub fn withdraw_roth(&mut self, amount: f64) -> f64 {
        let taken = amount.max(0.0).min(self.roth);
        self.roth -= taken;
        taken
    }

    pub fn withdraw_pretax(&mut self, bucket: Bucket, slot: Slot, amount: f64) -> f64 {
        let balance = match bucket {
            Bucket::PretaxStandard => self.pretax_standard.get_mut(slot),
            Bucket::Pretax457b => self.pretax_457b.get_mut(slot),
            _ => return 0.0,
        };
        let taken = amount.max(0.0).min(*balance);
        *balance -= taken;
        taken
    }

    pub fn preview_taxable_sale(&self, gross: f64, floor_balance: f64) -> TaxableSale {
        let gross = gross.max(0.0).min(self.taxable.balance);
        let ratio = gain_ratio(self.taxable.balance, self.taxable.basis, floor_balance);
        TaxableSale {
            gross,
            realized_gain: gross * ratio,
        }
    }

    /// Sells `gross` from the taxable bucket; basis leaves in proportion.
    pub fn sell_taxable(&mut self, gross: f64, floor_balance: f64) -> TaxableSale {
        let sale = self.preview_taxable_sale(gross, floor_balance);
        if sale.gross <= 0.0 {
            return sale;
        }
        let basis_portion = (sale.gross - sale.realized_gain).clamp(0.0, self.taxable.basis);
        self.taxable.balance -= sale.gross;
        self.taxable.basis = (self.taxable.basis - basis_portion)
            .max(0.0)
            .min(self.taxable.balance.max(0.0));
        self.clamp_negatives();
        sale
    }

    pub fn deposit_taxable(&mut self, amount: f64) {
        let amount = amount.max(0.0);
        self.taxable.balance += amount;
        self.taxable.basis += amount;
    }

    pub fn contribute(&mut self, bucket: Bucket, slot: Slot, amount: f64) {
        let amount = amount.max(0.0);
        match bucket {
            Bucket::Cash => self.cash += amount,
            Bucket::Taxable => self.deposit_taxable(amount),
            Bucket::PretaxStandard => *self.pretax_standard.get_mut(slot) += amount,
            Bucket::Pretax457b => *self.pretax_457b.get_mut(slot) += amount,
            Bucket::Roth => self.roth += amount,
            Bucket::HomeEquity => self.home_equity += amount,
        }
    }

    pub fn lock_depleted(&mut self) {
        self.cash = 0.0;
        self.taxable = TaxableBucket::default();
        self.pretax_standard = OwnerSplit::default();
        self.pretax_457b = OwnerSplit::default();
        self.roth = 0.0;
    }

    pub fn take_clamp_events(&mut self) -> u32 {
        std::mem::take(&mut self.clamp_events)
    }

    fn clamp_negatives(&mut self) {
        let mut clamps = 0;
        for value in [
            &mut self.cash,
            &mut self.taxable.balance,
            &mut self.taxable.basis,
            &mut self.pretax_standard.primary,
            &mut self.pretax_standard.spouse,
            &mut self.pretax_457b.primary,
            &mut self.pretax_457b.spouse,
            &mut self.roth,
            &mut self.home_equity,
        ] {
            if *value < 0.0 || !value.is_finite() {
                *value = 0.0;
                clamps += 1;
            }
        }
        if self.taxable.basis > self.taxable.balance {
            self.taxable.basis = self.taxable.balance;
        }
        self.clamp_events += clamps;
    }
}

pub fn contributions_from_accounts(accounts: &[Account]) -> Vec<Contribution> {
    accounts
        .iter()
        .filter(|account| account.common().annual_contribution > 0.0)
        .map(|account| {
            let common = account.common();
            Contribution {
                bucket: Bucket::of(account),
                slot: match common.owner {
                    Owner::Spouse => Slot::Spouse,
                    Owner::Primary | Owner::Joint => Slot::Primary,
                },
                annual_amount: common.annual_contribution,
            }
        })
        .collect()
}
