//! Decoder configuration for Push Port documents and record classification.

use std::sync::OnceLock;

use crate::decoder::{DecoderConfig, PathDecoder};
use crate::error::DecodeError;
use crate::node::Node;
use crate::record::{DarwinRecord, ReferenceRecord};

/// Paths whose children form one ordered heterogeneous record list.
const LIST_PATHS: [&str; 11] = [
    "Pport.uR",
    "Pport.uR.schedule",
    "Pport.uR.TS",
    "Pport.uR.OW",
    "Pport.sR",
    "Pport.sR.schedule",
    "Pport.sR.TS",
    "Pport.sR.OW",
    "PportTimetableRef",
    "PportTimetableRef.LateRunningReasons",
    "PportTimetableRef.CancellationReasons",
];

/// Formation carriages repeat under their parent and fold into one list.
const FOLDED_LISTS: [&str; 4] = [
    "Pport.uR.scheduleFormations.formation",
    "Pport.uR.scheduleFormations.formation.coaches.coach",
    "Pport.sR.scheduleFormations.formation",
    "Pport.sR.scheduleFormations.formation.coaches.coach",
];

/// Station message bodies carry embedded HTML which must survive as text.
const DETOKENISE: [&str; 2] = ["Pport.uR.OW.Msg", "Pport.sR.OW.Msg"];

fn darwin_decoder() -> &'static PathDecoder {
    static DECODER: OnceLock<PathDecoder> = OnceLock::new();
    DECODER.get_or_init(|| {
        PathDecoder::new(
            DecoderConfig::new()
                .list_paths(LIST_PATHS)
                .folded_lists(FOLDED_LISTS)
                .detokenise(DETOKENISE),
        )
    })
}

/// Decodes a full document without classification.
pub fn parse_xml(xml: &str) -> Result<Node, DecodeError> {
    darwin_decoder().parse(xml)
}

/// Decodes a live Pport document and classifies the records of its `uR`
/// (else `sR`) branch. Unknown tags are skipped silently; records that fail
/// extraction are logged and skipped.
pub fn parse_darwin(xml: &str) -> Result<Vec<DarwinRecord>, DecodeError> {
    let root = darwin_decoder().parse(xml)?;
    let Some(pport) = root.child("Pport") else {
        return Ok(Vec::new());
    };
    let Some(branch) = pport.child("uR").or_else(|| pport.child("sR")) else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for item in branch.items() {
        match DarwinRecord::from_node(item) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(why) => {
                log::warn!("skipping undecodable <{}> record: {}", item.tag(), why)
            }
        }
    }
    Ok(records)
}

/// Decodes a `PportTimetableRef` reference-data document.
pub fn parse_reference(xml: &str) -> Result<Vec<ReferenceRecord>, DecodeError> {
    let root = darwin_decoder().parse(xml)?;
    let Some(reference) = root.child("PportTimetableRef") else {
        return Ok(Vec::new());
    };

    let mut records = Vec::new();
    for item in reference.items() {
        match ReferenceRecord::from_node(item) {
            Ok(Some(record)) => records.push(record),
            Ok(None) => {}
            Err(why) => {
                log::warn!("skipping undecodable <{}> reference: {}", item.tag(), why)
            }
        }
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use model::reference::ReasonKind;
    use model::schedule::CallPointKind;
    use model::status::TimingKind;

    const SCHEDULE_XML: &str = r#"<Pport xmlns="http://www.thalesgroup.com/rtti/PushPort/v16" ts="2021-06-01T10:00:00.0000000+01:00" version="16.0">
        <uR updateOrigin="CIS">
            <schedule rid="202106018001234" uid="P01234" trainId="1A23" ssd="2021-06-01" toc="VT" trainCat="XX" isPassengerSvc="true">
                <ns2:OR tpl="EUSTON" act="TB" wtd="10:00:00" ptd="10:00" xmlns:ns2="http://www.thalesgroup.com/rtti/PushPort/Schedules/v2"/>
                <ns2:IP tpl="MKNSCEN" act="T" wta="10:30:00" wtd="10:31:00" pta="10:30" ptd="10:31" xmlns:ns2="http://www.thalesgroup.com/rtti/PushPort/Schedules/v2"/>
                <ns2:PP tpl="RUGBY" wtp="10:55:00" xmlns:ns2="http://www.thalesgroup.com/rtti/PushPort/Schedules/v2"/>
                <ns2:DT tpl="BHAMNWS" act="TF" wta="11:25:00" pta="11:25" xmlns:ns2="http://www.thalesgroup.com/rtti/PushPort/Schedules/v2"/>
                <ns2:cancelReason tiploc="RUGBY" near="true" xmlns:ns2="http://www.thalesgroup.com/rtti/PushPort/Schedules/v2">100</ns2:cancelReason>
            </schedule>
        </uR>
    </Pport>"#;

    #[test]
    fn classifies_schedule_records() {
        let records = parse_darwin(SCHEDULE_XML).unwrap();
        assert_eq!(records.len(), 1);
        let DarwinRecord::Schedule(schedule) = &records[0] else {
            panic!("expected a schedule record");
        };
        assert_eq!(schedule.rid, "202106018001234");
        assert_eq!(schedule.uid, "P01234");
        assert_eq!(schedule.signalling_id, "1A23");
        assert_eq!(schedule.operator, "VT");
        assert_eq!(schedule.category, "XX");
        assert_eq!(schedule.status, "P");
        assert_eq!(schedule.ssd, NaiveDate::from_ymd_opt(2021, 6, 1).unwrap());
        assert!(schedule.is_active);
        assert!(!schedule.is_charter);

        assert_eq!(schedule.calls.len(), 4);
        assert_eq!(schedule.calls[0].kind, CallPointKind::Origin);
        assert_eq!(schedule.calls[0].tiploc, "EUSTON");
        assert_eq!(schedule.calls[2].kind, CallPointKind::Pass);
        assert_eq!(schedule.calls[3].kind, CallPointKind::Destination);

        let reason = schedule.cancel_reason.as_ref().unwrap();
        assert_eq!(reason.code, "100");
        assert_eq!(reason.tiploc.as_deref(), Some("RUGBY"));
        assert!(reason.near);
        assert_eq!(reason.kind, ReasonKind::Cancellation);
    }

    #[test]
    fn classifies_status_records() {
        let xml = r#"<Pport><uR>
            <TS rid="202106018001234" uid="P01234" ssd="2021-06-01">
                <Location tpl="MKNSCEN" wta="10:30:00" wtd="10:31:00">
                    <arr at="10:31:30" src="AUTO" delayed="true"/>
                    <dep et="10:33:00" src="Darwin"/>
                    <plat platsup="false" conf="true" platsrc="A">4</plat>
                    <length>8</length>
                </Location>
                <LateReason tiploc="EUSTON">128</LateReason>
            </TS>
        </uR></Pport>"#;
        let records = parse_darwin(xml).unwrap();
        let DarwinRecord::Status(status) = &records[0] else {
            panic!("expected a TS record");
        };
        assert_eq!(status.rid, "202106018001234");
        assert_eq!(status.locations.len(), 1);
        let location = &status.locations[0];
        assert_eq!(location.tiploc, "MKNSCEN");
        assert_eq!(location.arrival.kind, Some(TimingKind::Actual));
        assert!(location.arrival.delayed);
        assert_eq!(location.departure.kind, Some(TimingKind::Estimated));
        assert_eq!(location.platform.platform.as_deref(), Some("4"));
        assert!(location.platform.confirmed);
        assert_eq!(location.length, Some(8));
        assert_eq!(location.original_wt(), "103000      103100");

        let reason = status.late_reason.as_ref().unwrap();
        assert_eq!(reason.code, "128");
        assert_eq!(reason.kind, ReasonKind::Delay);
    }

    #[test]
    fn classifies_station_messages_with_embedded_html() {
        let xml = r#"<Pport><uR>
            <OW id="M1" cat="Misc" sev="1">
                <Station crs="KGX"/>
                <Station crs="FPK"/>
                <Msg><p>Mind the <a href="http://nr.example">gap</a>.</p></Msg>
            </OW>
        </uR></Pport>"#;
        let records = parse_darwin(xml).unwrap();
        let DarwinRecord::StationMessage(message) = &records[0] else {
            panic!("expected an OW record");
        };
        assert_eq!(message.id, "M1");
        assert_eq!(message.stations, ["KGX", "FPK"]);
        assert_eq!(
            message.body,
            r#"<p>Mind the <a href="http://nr.example">gap</a>.</p>"#
        );
    }

    #[test]
    fn selects_snapshot_branch_when_no_update_branch() {
        let xml = r#"<Pport><sR><deactivated rid="R1"/></sR></Pport>"#;
        let records = parse_darwin(xml).unwrap();
        assert!(matches!(
            &records[0],
            DarwinRecord::Deactivated(deactivated) if deactivated.rid == "R1"
        ));
    }

    #[test]
    fn skips_unknown_tags_and_bad_records() {
        let xml = r#"<Pport><uR>
            <trainOrder rid="x"/>
            <deactivated/>
            <deactivated rid="R2"/>
        </uR></Pport>"#;
        let records = parse_darwin(xml).unwrap();
        assert_eq!(records.len(), 1);
        assert!(matches!(
            &records[0],
            DarwinRecord::Deactivated(deactivated) if deactivated.rid == "R2"
        ));
    }

    #[test]
    fn parses_reference_documents() {
        let xml = r#"<PportTimetableRef timetableId="20210601">
            <LocationRef tpl="EUSTON" crs="EUS" toc="NR" locname="London Euston"/>
            <LocationRef tpl="LNGSGHJ" locname="LNGSGHJ"/>
            <TocRef toc="VT" tocname="Avanti West Coast" url="http://example.net"/>
            <CancellationReasons>
                <Reason code="100" reasontext="a broken down train"/>
            </CancellationReasons>
            <LateRunningReasons>
                <Reason code="128" reasontext="congestion"/>
            </LateRunningReasons>
        </PportTimetableRef>"#;
        let records = parse_reference(xml).unwrap();
        assert_eq!(records.len(), 5);
        let ReferenceRecord::Location(location) = &records[0] else {
            panic!("expected a location record");
        };
        assert_eq!(location.tiploc, "EUSTON");
        assert_eq!(location.crs.as_deref(), Some("EUS"));
        let ReferenceRecord::Reasons { kind, entries } = &records[3] else {
            panic!("expected reasons");
        };
        assert_eq!(*kind, ReasonKind::Cancellation);
        assert_eq!(entries[0].code, "100");
    }

    #[test]
    fn association_record_round_trip() {
        let xml = r#"<Pport><uR>
            <association category="JJ" tiploc="YORK">
                <main rid="A" wta="10:00:00" wtd="10:02:00"/>
                <assoc rid="B" wta="10:05:00" wtd="10:07:00"/>
            </association>
        </uR></Pport>"#;
        let records = parse_darwin(xml).unwrap();
        let DarwinRecord::Association(association) = &records[0] else {
            panic!("expected an association record");
        };
        assert_eq!(association.category, "JJ");
        assert_eq!(association.main.rid, "A");
        assert_eq!(association.main.original_wt(), "100000      100200");
        assert_eq!(association.assoc.original_wt(), "100500      100700");
    }
}
