//! Calendar year-month value.

use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

/// A calendar month, ordered by `year * 100 + month`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct YearMonth {
    pub year: i32,
    pub month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Self {
        Self { year, month }
    }

    /// The month containing `date`.
    pub fn of(date: NaiveDate) -> Self {
        Self::new(date.year(), date.month())
    }

    /// `YYYYMM` as an integer.
    pub fn value(&self) -> i32 {
        self.year * 100 + self.month as i32
    }

    pub fn from_yyyymm(value: i32) -> Self {
        Self::new(value / 100, (value % 100) as u32)
    }

    /// Shift by `months` (may be negative), rolling the year over as needed.
    pub fn add_months(&self, months: i32) -> Self {
        if months == 0 {
            return *self;
        }
        let total = self.year * 12 + (self.month as i32 - 1) + months;
        Self::new(total.div_euclid(12), total.rem_euclid(12) as u32 + 1)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}{:02}", self.year, self.month)
    }
}
