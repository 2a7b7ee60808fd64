use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

/// Whether a reported timing is an estimate or an observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimingKind {
    #[serde(rename = "E")]
    Estimated,
    #[serde(rename = "A")]
    Actual,
}

impl TimingKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Estimated => "E",
            Self::Actual => "A",
        }
    }
}

/// A single live timing (arrival, pass or departure) with its reporting source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Timing {
    pub time: Option<NaiveTime>,
    pub source: Option<String>,
    pub kind: Option<TimingKind>,
    pub delayed: bool,
}

/// Platform information attached to a live status report.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Platform {
    pub platform: Option<String>,
    pub suppressed: bool,
    pub cis_suppressed: bool,
    pub confirmed: bool,
    pub source: Option<String>,
}

/// Live status for one call point, keyed by (rid, tiploc, original_wt).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleStatus {
    pub rid: String,
    pub tiploc: String,
    pub original_wt: String,
    pub arrival: Timing,
    pub pass: Timing,
    pub departure: Timing,
    pub platform: Platform,
    pub length: Option<i32>,
}
