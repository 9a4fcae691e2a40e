//! Invoice frequencies and the canonical period each one bills

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use core_kernel::BillingPeriod;

use crate::error::BillingError;

/// How often an account is invoiced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvoiceFrequency {
    /// One invoice per ride, generated right after the charge is recorded
    PerRide,
    Daily,
    Weekly,
    Monthly,
}

impl InvoiceFrequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceFrequency::PerRide => "per_ride",
            InvoiceFrequency::Daily => "daily",
            InvoiceFrequency::Weekly => "weekly",
            InvoiceFrequency::Monthly => "monthly",
        }
    }

    /// Whether a scheduled sweep handles this frequency
    pub fn is_scheduled(&self) -> bool {
        !matches!(self, InvoiceFrequency::PerRide)
    }

    /// The canonical period billed by a sweep run at `as_of`
    ///
    /// The period always ends strictly before `as_of`'s UTC calendar day:
    /// Daily bills the previous day, Weekly the seven days ending yesterday,
    /// Monthly the previous calendar month.
    ///
    /// # Errors
    ///
    /// Returns a Validation error for PerRide, which is never swept.
    pub fn period_ending_before(&self, as_of: DateTime<Utc>) -> Result<BillingPeriod, BillingError> {
        let today = as_of.date_naive();
        let period = match self {
            InvoiceFrequency::Daily => BillingPeriod::previous_day(today)?,
            InvoiceFrequency::Weekly => BillingPeriod::trailing_week(today)?,
            InvoiceFrequency::Monthly => BillingPeriod::previous_month(today)?,
            InvoiceFrequency::PerRide => {
                return Err(BillingError::validation(
                    "per-ride invoices are generated when the charge is recorded, not on a schedule",
                ))
            }
        };
        Ok(period)
    }
}

impl fmt::Display for InvoiceFrequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceFrequency {
    type Err = BillingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "per_ride" | "perride" => Ok(InvoiceFrequency::PerRide),
            "daily" => Ok(InvoiceFrequency::Daily),
            "weekly" => Ok(InvoiceFrequency::Weekly),
            "monthly" => Ok(InvoiceFrequency::Monthly),
            other => Err(BillingError::validation(format!("unknown invoice frequency '{}'", other))),
        }
    }
}
