//! Balance reading returned by the utility portal

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A single balance query result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceReading {
    /// Remaining electricity in kWh
    pub remaining_kwh: f64,

    /// Remaining prepaid money in CNY
    pub remaining_money: f64,

    /// Price per kWh in CNY
    pub unit_price: f64,

    /// Remaining free quota in kWh
    pub free_kwh: f64,

    /// When the portal last read the meter, if it said
    pub measured_at: Option<DateTime<Utc>>,

    /// When we received the response
    pub fetched_at: DateTime<Utc>,
}

impl BalanceReading {
    /// Create a reading with only the balance known
    pub fn new(remaining_kwh: f64, fetched_at: DateTime<Utc>) -> Self {
        Self {
            remaining_kwh,
            remaining_money: 0.0,
            unit_price: 0.0,
            free_kwh: 0.0,
            measured_at: None,
            fetched_at,
        }
    }

    /// Meter time if the portal reported one, otherwise the fetch time
    pub fn query_time(&self) -> DateTime<Utc> {
        self.measured_at.unwrap_or(self.fetched_at)
    }

    /// Query time rendered in the host's local zone
    pub fn query_time_display(&self) -> String {
        self.query_time()
            .with_timezone(&Local)
            .format("%Y-%m-%d %H:%M:%S")
            .to_string()
    }
}

impl fmt::Display for BalanceReading {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:.2} kWh left | ¥{:.2} left | ¥{:.4}/kWh | queried {}",
            self.remaining_kwh,
            self.remaining_money,
            self.unit_price,
            self.query_time_display()
        )
    }
}
