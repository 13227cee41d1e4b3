//! Installment planning
//!
//! Splits an invoice total into N installments and gives each one a due date.
//!
//! - Amounts: the first N-1 installments are the even split rounded to the
//!   currency unit; the last one takes `total - sum(first N-1)` so the plan
//!   always adds up to the invoice total exactly.
//! - Dates: installment `i` targets `base + cadence * i` days, then moves
//!   forward to the earliest empty day (or else the least busy day under the
//!   daily cap) inside the search window. Each assignment is counted in the
//!   occupancy map before the next installment is placed.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;
use crate::errors::DomainError;
use crate::money::round_to_unit;

/// Due date -> number of installments already due that day.
pub type Occupancy = BTreeMap<NaiveDate, u32>;

pub fn occupancy_from_dates<I>(dates: I) -> Occupancy
where
    I: IntoIterator<Item = NaiveDate>,
{
    let mut occupancy = Occupancy::new();
    for date in dates {
        *occupancy.entry(date).or_insert(0) += 1;
    }
    occupancy
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannerConfig {
    pub cadence_days: u32,
    pub search_window_days: u32,
    pub max_per_day: u32,
    pub rounding_unit: Decimal,
    pub max_installments: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self::from(&LedgerConfig::default())
    }
}

impl From<&LedgerConfig> for PlannerConfig {
    fn from(config: &LedgerConfig) -> Self {
        Self {
            cadence_days: config.cadence_days,
            search_window_days: config.search_window_days,
            max_per_day: config.max_per_day,
            rounding_unit: Decimal::from(config.rounding_unit),
            max_installments: config.max_installments,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct InstallmentPlan {
    pub due_dates: Vec<NaiveDate>,
    pub amounts: Vec<Decimal>,
}

impl InstallmentPlan {
    pub fn len(&self) -> usize {
        self.amounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }

    pub fn total(&self) -> Decimal {
        self.amounts.iter().copied().sum()
    }

    /// `(sequence, due_date, amount)` with 1-based sequence numbers.
    pub fn installments(&self) -> impl Iterator<Item = (u32, NaiveDate, Decimal)> + '_ {
        self.due_dates
            .iter()
            .zip(&self.amounts)
            .enumerate()
            .map(|(index, (due_date, amount))| (index as u32 + 1, *due_date, *amount))
    }

    /// True when rounding pushed the remainder installment to zero or below.
    pub fn has_non_positive_amount(&self) -> bool {
        self.amounts.iter().any(|amount| *amount <= Decimal::ZERO)
    }
}

#[derive(Clone, Debug, Default)]
pub struct InstallmentPlanner {
    config: PlannerConfig,
}

impl InstallmentPlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &PlannerConfig {
        &self.config
    }

    pub fn plan(
        &self,
        total_amount: Decimal,
        installment_count: u32,
        base_date: NaiveDate,
        mut occupancy: Occupancy,
    ) -> Result<InstallmentPlan, DomainError> {
        if installment_count == 0 {
            return Err(DomainError::InvalidPlan("installment count must be at least 1".into()));
        }
        if installment_count > self.config.max_installments {
            return Err(DomainError::InvalidPlan(format!(
                "{installment_count} installments exceeds the limit of {}",
                self.config.max_installments
            )));
        }
        if total_amount <= Decimal::ZERO {
            return Err(DomainError::InvalidPlan("total amount must be positive".into()));
        }

        let amounts = self.split_amount(total_amount, installment_count);

        let mut due_dates = Vec::with_capacity(installment_count as usize);
        for sequence in 1..=installment_count {
            let offset = i64::from(self.config.cadence_days) * i64::from(sequence);
            let target = base_date.checked_add_signed(Duration::days(offset)).ok_or_else(|| {
                DomainError::InvalidPlan(format!("due date for installment {sequence} overflows"))
            })?;

            let due_date = self.find_available_date(target, &occupancy);
            *occupancy.entry(due_date).or_insert(0) += 1;
            due_dates.push(due_date);
        }

        Ok(InstallmentPlan { due_dates, amounts })
    }

    pub fn split_amount(&self, total_amount: Decimal, installment_count: u32) -> Vec<Decimal> {
        if installment_count <= 1 {
            return vec![total_amount];
        }

        let even_share = total_amount / Decimal::from(installment_count);
        let rounded = round_to_unit(even_share, self.config.rounding_unit);
        let leading = installment_count as usize - 1;
        let last = total_amount - rounded * Decimal::from(leading as u32);

        let mut amounts = vec![rounded; leading];
        amounts.push(last);
        amounts
    }

    /// Earliest empty day in the window, else the least occupied day below the
    /// cap (earliest on ties), else `target` unchanged.
    pub fn find_available_date(&self, target: NaiveDate, occupancy: &Occupancy) -> NaiveDate {
        let mut best: Option<(NaiveDate, u32)> = None;

        for offset in 0..i64::from(self.config.search_window_days) {
            let Some(candidate) = target.checked_add_signed(Duration::days(offset)) else {
                break;
            };
            let load = occupancy.get(&candidate).copied().unwrap_or(0);

            if load == 0 {
                return candidate;
            }

            let improves = best.map_or(true, |(_, best_load)| load < best_load);
            if load < self.config.max_per_day && improves {
                best = Some((candidate, load));
            }
        }

        best.map(|(date, _)| date).unwrap_or(target)
    }
}
