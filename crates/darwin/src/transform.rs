//! Transformation of classified records into database row values.

use serde_json::Value as JsonValue;

use model::association::Association;
use model::message::StationMessage;
use model::reference::{DisruptionReason, ReferenceSnapshot};
use model::schedule::{Schedule, ScheduleEndpoint, ScheduleLocation};
use model::status::ScheduleStatus;

use crate::record::{
    AssociationRecord, ReasonRecord, ScheduleRecord, StationMessageRecord,
    StatusRecord,
};
use crate::time::DayProjector;

/// Everything a schedule message writes, ready for binding.
#[derive(Debug, Clone)]
pub struct ScheduleRows {
    pub schedule: Schedule,
    pub locations: Vec<ScheduleLocation>,
    pub origins: Vec<JsonValue>,
    pub destinations: Vec<JsonValue>,
    pub cancel_reason: Option<JsonValue>,
}

/// Projects a schedule's call points and collects its endpoint lists.
///
/// The day-offset state is shared by all five time fields of every call
/// point, in document order.
pub fn schedule_rows(record: &ScheduleRecord, refs: &ReferenceSnapshot) -> ScheduleRows {
    let mut projector = DayProjector::new(record.ssd);
    let mut locations = Vec::with_capacity(record.calls.len());
    let mut origins = Vec::new();
    let mut destinations = Vec::new();

    for (index, call) in record.calls.iter().enumerate() {
        let pta = projector.project(call.pta);
        let wta = projector.project(call.wta);
        let wtp = projector.project(call.wtp);
        let ptd = projector.project(call.ptd);
        let wtd = projector.project(call.wtd);

        locations.push(ScheduleLocation {
            rid: record.rid.clone(),
            index: index as i32,
            kind: call.kind,
            tiploc: call.tiploc.clone(),
            activity: call.activity.clone(),
            original_wt: call.original_wt(),
            pta,
            wta,
            wtp,
            ptd,
            wtd,
            cancelled: call.cancelled,
            rdelay: call.rdelay,
        });

        if call.kind.is_origin() || call.kind.is_destination() {
            let endpoint = ScheduleEndpoint {
                source: "SC".to_owned(),
                kind: call.kind,
                activity: call.activity.clone(),
                cancelled: call.cancelled,
                location: refs.outline(&call.tiploc),
                association_tiploc: None,
            };
            let value =
                serde_json::to_value(&endpoint).unwrap_or(JsonValue::Null);
            if call.kind.is_origin() {
                origins.push(value);
            } else {
                destinations.push(value);
            }
        }
    }

    ScheduleRows {
        schedule: Schedule {
            rid: record.rid.clone(),
            uid: record.uid.clone(),
            rsid: record.rsid.clone(),
            ssd: record.ssd,
            signalling_id: record.signalling_id.clone(),
            status: record.status.clone(),
            category: record.category.clone(),
            operator: record.operator.clone(),
            is_active: record.is_active,
            is_charter: record.is_charter,
            is_deleted: record.is_deleted,
            is_passenger: record.is_passenger,
        },
        locations,
        origins,
        destinations,
        cancel_reason: record
            .cancel_reason
            .as_ref()
            .map(|reason| reason_value(reason, refs)),
    }
}

/// Renders a cancel or late-running reason with its localized message and
/// reference location, when known.
pub fn reason_value(record: &ReasonRecord, refs: &ReferenceSnapshot) -> JsonValue {
    let reason = DisruptionReason {
        code: record.code.clone(),
        message: refs
            .reason(&record.code, record.kind)
            .map(str::to_owned),
        location: record
            .tiploc
            .as_deref()
            .and_then(|tiploc| refs.location(tiploc).map(Into::into)),
        near: record.near,
    };
    serde_json::to_value(&reason).unwrap_or(JsonValue::Null)
}

/// Live status rows of a TS record, keyed by (rid, tiploc, original_wt).
pub fn status_rows(record: &StatusRecord) -> Vec<ScheduleStatus> {
    record
        .locations
        .iter()
        .map(|location| ScheduleStatus {
            rid: record.rid.clone(),
            tiploc: location.tiploc.clone(),
            original_wt: location.original_wt(),
            arrival: location.arrival.clone(),
            pass: location.pass.clone(),
            departure: location.departure.clone(),
            platform: location.platform.clone(),
            length: location.length,
        })
        .collect()
}

/// Builds the stored association row. Join associations ("JJ") are
/// inverted and stored as "JN" so that every row points at the next
/// service; all other categories keep their orientation.
pub fn association_row(record: &AssociationRecord) -> Association {
    if record.category == "JJ" {
        Association {
            category: "JN".to_owned(),
            tiploc: record.tiploc.clone(),
            main_rid: record.assoc.rid.clone(),
            main_original_wt: record.assoc.original_wt(),
            assoc_rid: record.main.rid.clone(),
            assoc_original_wt: record.main.original_wt(),
        }
    } else {
        Association {
            category: record.category.clone(),
            tiploc: record.tiploc.clone(),
            main_rid: record.main.rid.clone(),
            main_original_wt: record.main.original_wt(),
            assoc_rid: record.assoc.rid.clone(),
            assoc_original_wt: record.assoc.original_wt(),
        }
    }
}

/// The station message with its body normalized for display.
pub fn station_message(record: &StationMessageRecord) -> StationMessage {
    StationMessage {
        id: record.id.clone(),
        category: record.category.clone(),
        severity: record.severity.clone(),
        suppress: record.suppress,
        stations: record.stations.clone(),
        body: normalize_message_body(&record.body),
    }
}

/// Message bodies arrive inconsistently wrapped in paragraph tags: some
/// enclosed in one `<p>`, some carrying empty `<p></p>` pairs, some split
/// across paragraphs.
pub fn normalize_message_body(raw: &str) -> String {
    let body = raw.strip_prefix("<p>").unwrap_or(raw);
    let body = body.strip_suffix("</p>").unwrap_or(body);
    body.replace("<p></p>", "").replace("</p><p>", "<br>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_darwin;
    use crate::record::DarwinRecord;

    fn schedule_record(xml: &str) -> ScheduleRecord {
        let records = parse_darwin(xml).unwrap();
        match records.into_iter().next() {
            Some(DarwinRecord::Schedule(schedule)) => schedule,
            other => panic!("expected a schedule record, got {:?}", other),
        }
    }

    #[test]
    fn projects_call_points_across_midnight() {
        let record = schedule_record(
            r#"<Pport><uR>
                <schedule rid="R1" uid="U1" trainId="1A23" ssd="2021-06-01" toc="VT">
                    <OR tpl="A" wta="23:55:00" wtd="00:05:00"/>
                    <DT tpl="B" wta="00:45:00"/>
                </schedule>
            </uR></Pport>"#,
        );
        let rows = schedule_rows(&record, &ReferenceSnapshot::default());
        assert_eq!(rows.locations.len(), 2);
        let origin = &rows.locations[0];
        assert_eq!(origin.wta.unwrap().to_string(), "2021-06-01 23:55:00");
        assert_eq!(origin.wtd.unwrap().to_string(), "2021-06-02 00:05:00");
        let destination = &rows.locations[1];
        assert_eq!(destination.wta.unwrap().to_string(), "2021-06-02 00:45:00");
    }

    #[test]
    fn indices_are_dense_and_ordered() {
        let record = schedule_record(
            r#"<Pport><uR>
                <schedule rid="R1" uid="U1" trainId="1A23" ssd="2021-06-01" toc="VT">
                    <OR tpl="A" wtd="10:00:00"/>
                    <IP tpl="B" wta="10:10:00" wtd="10:11:00"/>
                    <PP tpl="C" wtp="10:20:00"/>
                    <DT tpl="D" wta="10:30:00"/>
                </schedule>
            </uR></Pport>"#,
        );
        let rows = schedule_rows(&record, &ReferenceSnapshot::default());
        let indices: Vec<i32> = rows.locations.iter().map(|l| l.index).collect();
        assert_eq!(indices, [0, 1, 2, 3]);
    }

    #[test]
    fn endpoint_lists_cover_origins_and_destinations() {
        let record = schedule_record(
            r#"<Pport><uR>
                <schedule rid="R1" uid="U1" trainId="1A23" ssd="2021-06-01" toc="VT">
                    <OPOR tpl="SDG" wtd="09:50:00"/>
                    <OR tpl="A" act="TB" wtd="10:00:00"/>
                    <IP tpl="B" wta="10:10:00" wtd="10:11:00"/>
                    <DT tpl="D" act="TF" wta="10:30:00" can="true"/>
                </schedule>
            </uR></Pport>"#,
        );
        let rows = schedule_rows(&record, &ReferenceSnapshot::default());
        assert_eq!(rows.origins.len(), 2);
        assert_eq!(rows.destinations.len(), 1);
        let origin = &rows.origins[1];
        assert_eq!(origin["source"], "SC");
        assert_eq!(origin["type"], "OR");
        assert_eq!(origin["activity"], "TB");
        assert_eq!(origin["tiploc"], "A");
        let destination = &rows.destinations[0];
        assert_eq!(destination["cancelled"], true);
        assert!(destination.get("association_tiploc").is_none());
    }

    #[test]
    fn empty_schedule_still_produces_the_schedule_row() {
        let record = schedule_record(
            r#"<Pport><uR>
                <schedule rid="R1" uid="U1" trainId="1A23" ssd="2021-06-01" toc="VT"/>
            </uR></Pport>"#,
        );
        let rows = schedule_rows(&record, &ReferenceSnapshot::default());
        assert!(rows.locations.is_empty());
        assert_eq!(rows.schedule.rid, "R1");
    }

    #[test]
    fn join_associations_invert_to_jn() {
        let records = parse_darwin(
            r#"<Pport><uR>
                <association category="JJ" tiploc="YORK">
                    <main rid="A" wta="10:00:00" wtd="10:02:00"/>
                    <assoc rid="B" wta="10:05:00" wtd="10:07:00"/>
                </association>
            </uR></Pport>"#,
        )
        .unwrap();
        let DarwinRecord::Association(record) = &records[0] else {
            panic!("expected an association");
        };
        let row = association_row(record);
        assert_eq!(row.category, "JN");
        assert_eq!(row.tiploc, "YORK");
        assert_eq!(row.main_rid, "B");
        assert_eq!(row.main_original_wt, "100500      100700");
        assert_eq!(row.assoc_rid, "A");
        assert_eq!(row.assoc_original_wt, "100000      100200");
    }

    #[test]
    fn non_join_associations_keep_their_orientation() {
        let records = parse_darwin(
            r#"<Pport><uR>
                <association category="VV" tiploc="CREWE">
                    <main rid="A" wtd="11:00:00"/>
                    <assoc rid="B" wtd="11:04:00"/>
                </association>
            </uR></Pport>"#,
        )
        .unwrap();
        let DarwinRecord::Association(record) = &records[0] else {
            panic!("expected an association");
        };
        let row = association_row(record);
        assert_eq!(row.category, "VV");
        assert_eq!(row.main_rid, "A");
        assert_eq!(row.assoc_rid, "B");
    }

    #[test]
    fn message_bodies_lose_their_paragraph_wrapping() {
        assert_eq!(normalize_message_body("<p>Simple.</p>"), "Simple.");
        assert_eq!(
            normalize_message_body("<p>One.</p><p>Two.</p>"),
            "One.<br>Two."
        );
        assert_eq!(normalize_message_body("Plain<p></p> text"), "Plain text");
    }
}
