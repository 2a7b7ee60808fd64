//! Typed views of classified Push Port records.
//!
//! The decoder produces a generic tree; the functions here pull the fields
//! each record type actually uses, with per-record failure so one bad
//! element never drops a whole frame.

use chrono::{NaiveDate, NaiveTime};

use model::reference::ReasonKind;
use model::schedule::CallPointKind;
use model::status::{Platform, Timing, TimingKind};

use crate::error::DecodeError;
use crate::node::Node;
use crate::time::{original_wt, parse_date, parse_time};

/// A classified record from the `uR`/`sR` branch of a Pport document.
#[derive(Debug, Clone)]
pub enum DarwinRecord {
    Schedule(ScheduleRecord),
    Status(StatusRecord),
    StationMessage(StationMessageRecord),
    Association(AssociationRecord),
    Deactivated(DeactivatedRecord),
}

impl DarwinRecord {
    /// Classifies one list element by tag. `Ok(None)` means the tag is not
    /// one we ingest.
    pub fn from_node(node: &Node) -> Result<Option<Self>, DecodeError> {
        match node.tag() {
            "schedule" => ScheduleRecord::from_node(node).map(Self::Schedule).map(Some),
            "TS" => StatusRecord::from_node(node).map(Self::Status).map(Some),
            "OW" => StationMessageRecord::from_node(node)
                .map(Self::StationMessage)
                .map(Some),
            "association" => AssociationRecord::from_node(node)
                .map(Self::Association)
                .map(Some),
            "deactivated" => Ok(Some(Self::Deactivated(DeactivatedRecord {
                rid: req(node, "rid")?.to_owned(),
            }))),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScheduleRecord {
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
    pub calls: Vec<CallRecord>,
    pub cancel_reason: Option<ReasonRecord>,
}

impl ScheduleRecord {
    fn from_node(node: &Node) -> Result<Self, DecodeError> {
        let mut calls = Vec::new();
        let mut cancel_reason = None;
        for child in node.items() {
            if let Some(kind) = CallPointKind::from_tag(child.tag()) {
                calls.push(CallRecord::from_node(child, kind)?);
            } else if child.tag() == "cancelReason" {
                cancel_reason = Some(ReasonRecord::from_node(child));
            }
        }
        Ok(Self {
            rid: req(node, "rid")?.to_owned(),
            uid: req(node, "uid")?.to_owned(),
            rsid: opt(node, "rsid"),
            ssd: parse_date(req(node, "ssd")?)?,
            signalling_id: req(node, "trainId")?.to_owned(),
            status: attr_or(node, "status", "P"),
            category: attr_or(node, "trainCat", "OO"),
            operator: req(node, "toc")?.to_owned(),
            is_active: node.flag_or("isActive", true),
            is_charter: node.flag("isCharter"),
            is_deleted: node.flag("deleted"),
            is_passenger: node.flag_or("isPassengerSvc", true),
            calls,
            cancel_reason,
        })
    }
}

/// One call point element of a schedule, times still unprojected.
#[derive(Debug, Clone)]
pub struct CallRecord {
    pub kind: CallPointKind,
    pub tiploc: String,
    pub activity: String,
    pub pta: Option<NaiveTime>,
    pub wta: Option<NaiveTime>,
    pub wtp: Option<NaiveTime>,
    pub ptd: Option<NaiveTime>,
    pub wtd: Option<NaiveTime>,
    pub cancelled: bool,
    pub rdelay: i32,
}

impl CallRecord {
    fn from_node(node: &Node, kind: CallPointKind) -> Result<Self, DecodeError> {
        Ok(Self {
            kind,
            tiploc: req(node, "tpl")?.to_owned(),
            activity: node.attr("act").unwrap_or("").to_owned(),
            pta: opt_time(node, "pta")?,
            wta: opt_time(node, "wta")?,
            wtp: opt_time(node, "wtp")?,
            ptd: opt_time(node, "ptd")?,
            wtd: opt_time(node, "wtd")?,
            cancelled: node.flag("can"),
            rdelay: node
                .attr("rdelay")
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(0),
        })
    }

    pub fn original_wt(&self) -> String {
        original_wt(self.wta, self.wtp, self.wtd)
    }
}

/// A cancel or late-running reason element; the code is the element text.
#[derive(Debug, Clone)]
pub struct ReasonRecord {
    pub code: String,
    pub tiploc: Option<String>,
    pub near: bool,
    pub kind: ReasonKind,
}

impl ReasonRecord {
    fn from_node(node: &Node) -> Self {
        Self {
            code: node.text().trim().to_owned(),
            tiploc: opt(node, "tiploc"),
            near: node.flag("near"),
            kind: if node.tag() == "cancelReason" {
                ReasonKind::Cancellation
            } else {
                ReasonKind::Delay
            },
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatusRecord {
    pub rid: String,
    pub locations: Vec<StatusCallRecord>,
    pub late_reason: Option<ReasonRecord>,
}

impl StatusRecord {
    fn from_node(node: &Node) -> Result<Self, DecodeError> {
        let mut locations = Vec::new();
        let mut late_reason = None;
        for child in node.items() {
            match child.tag() {
                "Location" => locations.push(StatusCallRecord::from_node(child)?),
                "LateReason" => late_reason = Some(ReasonRecord::from_node(child)),
                _ => {}
            }
        }
        Ok(Self {
            rid: req(node, "rid")?.to_owned(),
            locations,
            late_reason,
        })
    }
}

/// Live timings for one call point of a TS record.
#[derive(Debug, Clone)]
pub struct StatusCallRecord {
    pub tiploc: String,
    pub wta: Option<NaiveTime>,
    pub wtp: Option<NaiveTime>,
    pub wtd: Option<NaiveTime>,
    pub arrival: Timing,
    pub pass: Timing,
    pub departure: Timing,
    pub platform: Platform,
    pub length: Option<i32>,
}

impl StatusCallRecord {
    fn from_node(node: &Node) -> Result<Self, DecodeError> {
        Ok(Self {
            tiploc: req(node, "tpl")?.to_owned(),
            wta: opt_time(node, "wta")?,
            wtp: opt_time(node, "wtp")?,
            wtd: opt_time(node, "wtd")?,
            arrival: timing(node.child("arr"))?,
            pass: timing(node.child("pass"))?,
            departure: timing(node.child("dep"))?,
            platform: platform(node.child("plat")),
            length: node
                .child("length")
                .and_then(|length| length.text().trim().parse().ok()),
        })
    }

    pub fn original_wt(&self) -> String {
        original_wt(self.wta, self.wtp, self.wtd)
    }
}

fn timing(node: Option<&Node>) -> Result<Timing, DecodeError> {
    let Some(node) = node else {
        return Ok(Timing::default());
    };
    let (time, kind) = if let Some(at) = node.attr("at") {
        (Some(parse_time(at)?), Some(TimingKind::Actual))
    } else if let Some(et) = node.attr("et") {
        (Some(parse_time(et)?), Some(TimingKind::Estimated))
    } else {
        (None, None)
    };
    Ok(Timing {
        time,
        source: opt(node, "src"),
        kind,
        delayed: node.flag("delayed"),
    })
}

fn platform(node: Option<&Node>) -> Platform {
    let Some(node) = node else {
        return Platform::default();
    };
    let text = node.text().trim();
    Platform {
        platform: (!text.is_empty()).then(|| text.to_owned()),
        suppressed: node.flag("platsup"),
        cis_suppressed: node.flag("cisPlatsup"),
        confirmed: node.flag("conf"),
        source: opt(node, "platsrc"),
    }
}

#[derive(Debug, Clone)]
pub struct AssociationRecord {
    pub category: String,
    pub tiploc: String,
    pub main: AssociationEnd,
    pub assoc: AssociationEnd,
}

impl AssociationRecord {
    fn from_node(node: &Node) -> Result<Self, DecodeError> {
        Ok(Self {
            category: req(node, "category")?.to_owned(),
            tiploc: req(node, "tiploc")?.to_owned(),
            main: AssociationEnd::from_node(
                node.child("main").ok_or(DecodeError::MissingField {
                    tag: node.tag().to_owned(),
                    field: "main",
                })?,
            )?,
            assoc: AssociationEnd::from_node(
                node.child("assoc").ok_or(DecodeError::MissingField {
                    tag: node.tag().to_owned(),
                    field: "assoc",
                })?,
            )?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct AssociationEnd {
    pub rid: String,
    pub wta: Option<NaiveTime>,
    pub wtp: Option<NaiveTime>,
    pub wtd: Option<NaiveTime>,
}

impl AssociationEnd {
    fn from_node(node: &Node) -> Result<Self, DecodeError> {
        Ok(Self {
            rid: req(node, "rid")?.to_owned(),
            wta: opt_time(node, "wta")?,
            wtp: opt_time(node, "wtp")?,
            wtd: opt_time(node, "wtd")?,
        })
    }

    pub fn original_wt(&self) -> String {
        original_wt(self.wta, self.wtp, self.wtd)
    }
}

#[derive(Debug, Clone)]
pub struct StationMessageRecord {
    pub id: String,
    pub category: Option<String>,
    pub severity: Option<String>,
    pub suppress: bool,
    pub stations: Vec<String>,
    /// Raw message body, inner HTML preserved by the decoder.
    pub body: String,
}

impl StationMessageRecord {
    fn from_node(node: &Node) -> Result<Self, DecodeError> {
        let mut stations = Vec::new();
        let mut body = String::new();
        for child in node.items() {
            match child.tag() {
                "Station" => stations.push(req(child, "crs")?.to_owned()),
                "Msg" => body = child.text().to_owned(),
                _ => {}
            }
        }
        Ok(Self {
            id: req(node, "id")?.to_owned(),
            category: opt(node, "cat"),
            severity: opt(node, "sev"),
            suppress: node.flag("suppress"),
            stations,
            body,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DeactivatedRecord {
    pub rid: String,
}

/// A record from a `PportTimetableRef` document.
#[derive(Debug, Clone)]
pub enum ReferenceRecord {
    Location(LocationRefRecord),
    Operator(TocRecord),
    Reasons {
        kind: ReasonKind,
        entries: Vec<ReasonEntry>,
    },
}

impl ReferenceRecord {
    pub fn from_node(node: &Node) -> Result<Option<Self>, DecodeError> {
        match node.tag() {
            "LocationRef" => Ok(Some(Self::Location(LocationRefRecord {
                tiploc: req(node, "tpl")?.to_owned(),
                crs: opt(node, "crs"),
                operator: opt(node, "toc"),
                name: req(node, "locname")?.to_owned(),
            }))),
            "TocRef" => Ok(Some(Self::Operator(TocRecord {
                code: req(node, "toc")?.to_owned(),
                name: req(node, "tocname")?.to_owned(),
                url: opt(node, "url"),
            }))),
            "CancellationReasons" | "LateRunningReasons" => {
                let kind = if node.tag() == "CancellationReasons" {
                    ReasonKind::Cancellation
                } else {
                    ReasonKind::Delay
                };
                let mut entries = Vec::new();
                for child in node.items() {
                    if child.tag() == "Reason" {
                        entries.push(ReasonEntry {
                            code: req(child, "code")?.to_owned(),
                            text: req(child, "reasontext")?.to_owned(),
                        });
                    }
                }
                Ok(Some(Self::Reasons { kind, entries }))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LocationRefRecord {
    pub tiploc: String,
    pub crs: Option<String>,
    pub operator: Option<String>,
    pub name: String,
}

#[derive(Debug, Clone)]
pub struct TocRecord {
    pub code: String,
    pub name: String,
    pub url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ReasonEntry {
    pub code: String,
    pub text: String,
}

fn req<'a>(node: &'a Node, field: &'static str) -> Result<&'a str, DecodeError> {
    node.attr(field).ok_or(DecodeError::MissingField {
        tag: node.tag().to_owned(),
        field,
    })
}

fn opt(node: &Node, field: &str) -> Option<String> {
    node.attr(field)
        .filter(|raw| !raw.is_empty())
        .map(str::to_owned)
}

fn attr_or(node: &Node, field: &str, default: &str) -> String {
    node.attr(field)
        .filter(|raw| !raw.is_empty())
        .unwrap_or(default)
        .to_owned()
}

fn opt_time(node: &Node, field: &str) -> Result<Option<NaiveTime>, DecodeError> {
    node.attr(field).map(parse_time).transpose()
}
