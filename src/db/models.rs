//! Database model types.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Status reported by a single poll of a location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleStatus {
    Active,
    Inactive,
}

impl SampleStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "inactive" => Some(Self::Inactive),
            _ => None,
        }
    }
}

/// A single status poll for a location.
#[derive(Debug, Clone)]
pub struct StatusSample {
    pub location_id: String,
    pub timestamp: DateTime<Utc>,
    pub status: SampleStatus,
}

/// A local clock-time range during which a location is expected to be open.
#[derive(Debug, Clone)]
pub struct BusinessHourWindow {
    pub location_id: String,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

/// A location and its IANA timezone identifier.
#[derive(Debug, Clone)]
pub struct LocationProfile {
    pub location_id: String,
    pub timezone: String,
}

/// Uptime/downtime figures for one location.
///
/// Hour values are minutes; day and week values are extrapolations of the
/// sampled hour. Field order is the exported column order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationMetrics {
    pub location_id: String,
    pub uptime_last_hour: f64,
    pub downtime_last_hour: f64,
    pub uptime_last_day: f64,
    pub downtime_last_day: f64,
    pub uptime_last_week: f64,
    pub downtime_last_week: f64,
}

/// Lifecycle state of a report. The payload lives on the variant, so a
/// result exists only for `Completed` and a reason only for `Failed`.
#[derive(Debug, Clone, PartialEq)]
pub enum ReportState {
    Running,
    Completed(Vec<LocationMetrics>),
    Failed(String),
}

impl ReportState {
    /// Name persisted in the `status` column.
    pub fn status_name(&self) -> &'static str {
        match self {
            Self::Running => "Running",
            Self::Completed(_) => "Completed",
            Self::Failed(_) => "Failed",
        }
    }
}

/// A report job record.
#[derive(Debug, Clone)]
pub struct Report {
    pub report_id: String,
    pub state: ReportState,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Report {
    pub fn result(&self) -> Option<&[LocationMetrics]> {
        match &self.state {
            ReportState::Completed(data) => Some(data),
            _ => None,
        }
    }
}
