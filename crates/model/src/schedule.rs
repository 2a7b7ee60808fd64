use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

use crate::reference::LocationOutline;

/// Call point classification carried by Darwin schedule location elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallPointKind {
    #[serde(rename = "OR")]
    Origin,
    #[serde(rename = "OPOR")]
    OperationalOrigin,
    #[serde(rename = "IP")]
    Intermediate,
    #[serde(rename = "OPIP")]
    OperationalIntermediate,
    #[serde(rename = "PP")]
    Pass,
    #[serde(rename = "DT")]
    Destination,
    #[serde(rename = "OPDT")]
    OperationalDestination,
}

impl CallPointKind {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "OR" => Some(Self::Origin),
            "OPOR" => Some(Self::OperationalOrigin),
            "IP" => Some(Self::Intermediate),
            "OPIP" => Some(Self::OperationalIntermediate),
            "PP" => Some(Self::Pass),
            "DT" => Some(Self::Destination),
            "OPDT" => Some(Self::OperationalDestination),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Origin => "OR",
            Self::OperationalOrigin => "OPOR",
            Self::Intermediate => "IP",
            Self::OperationalIntermediate => "OPIP",
            Self::Pass => "PP",
            Self::Destination => "DT",
            Self::OperationalDestination => "OPDT",
        }
    }

    pub fn is_origin(&self) -> bool {
        matches!(self, Self::Origin | Self::OperationalOrigin)
    }

    pub fn is_destination(&self) -> bool {
        matches!(self, Self::Destination | Self::OperationalDestination)
    }
}

/// One realized train run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub rid: String,
    pub uid: String,
    pub rsid: Option<String>,
    pub ssd: NaiveDate,
    pub signalling_id: String,
    pub status: String,
    pub category: String,
    pub operator: String,
    pub is_active: bool,
    pub is_charter: bool,
    pub is_deleted: bool,
    pub is_passenger: bool,
}

/// An ordered call point of a schedule, with times already projected onto
/// the service start date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleLocation {
    pub rid: String,
    pub index: i32,
    pub kind: CallPointKind,
    pub tiploc: String,
    pub activity: String,
    pub original_wt: String,
    pub pta: Option<NaiveDateTime>,
    pub wta: Option<NaiveDateTime>,
    pub wtp: Option<NaiveDateTime>,
    pub ptd: Option<NaiveDateTime>,
    pub wtd: Option<NaiveDateTime>,
    pub cancelled: bool,
    pub rdelay: i32,
}

/// One entry of a schedule's precomputed origin or destination list, stored
/// as a JSON value on the schedule row.
///
/// `source` is `"SC"` for the schedule's own endpoints; endpoints propagated
/// over an association carry that association's category instead, together
/// with `association_tiploc`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEndpoint {
    pub source: String,
    #[serde(rename = "type")]
    pub kind: CallPointKind,
    pub activity: String,
    pub cancelled: bool,
    #[serde(flatten)]
    pub location: LocationOutline,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub association_tiploc: Option<String>,
}
