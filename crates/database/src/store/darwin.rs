//! Folds classified Push Port records into ordered write operations.

use chrono::NaiveDateTime;

use darwin::record::{DarwinRecord, ScheduleRecord, StationMessageRecord, StatusRecord};
use darwin::transform;
use model::reference::ReferenceSnapshot;

use crate::error::DatabaseError;
use crate::value::SqlValue;
use crate::writer::{BatchStatement, Statement, WriteOp, WriterHandle, INSERT_ASSOCIATION};

const DELETE_LOCATIONS: &str =
    "DELETE FROM darwin_schedule_locations WHERE rid = $1;";

const UPSERT_SCHEDULE: &str = "\
    INSERT INTO darwin_schedules \
        (uid, rid, rsid, ssd, signalling_id, status, category, operator, \
         is_active, is_charter, is_deleted, is_passenger, origins, destinations) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13::json[], $14::json[]) \
    ON CONFLICT (rid) DO UPDATE SET \
        signalling_id = EXCLUDED.signalling_id, status = EXCLUDED.status, \
        category = EXCLUDED.category, operator = EXCLUDED.operator, \
        is_active = EXCLUDED.is_active, is_charter = EXCLUDED.is_charter, \
        is_deleted = EXCLUDED.is_deleted, is_passenger = EXCLUDED.is_passenger, \
        origins = EXCLUDED.origins, destinations = EXCLUDED.destinations;";

const INSERT_LOCATION: &str = "\
    INSERT INTO darwin_schedule_locations \
        (rid, index, type, tiploc, activity, original_wt, \
         pta, wta, wtp, ptd, wtd, cancelled, rdelay) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13) \
    ON CONFLICT DO NOTHING;";

const UPDATE_CANCEL_REASON: &str =
    "UPDATE darwin_schedules SET cancel_reason = $1 WHERE rid = $2;";

const UPDATE_DELAY_REASON: &str =
    "UPDATE darwin_schedules SET delay_reason = $1 WHERE rid = $2;";

const DEACTIVATE_SCHEDULE: &str =
    "UPDATE darwin_schedules SET is_active = FALSE WHERE rid = $1;";

const UPSERT_STATUS: &str = "\
    INSERT INTO darwin_schedule_status \
        (rid, tiploc, original_wt, ta, tp, td, \
         ta_source, tp_source, td_source, ta_type, tp_type, td_type, \
         ta_delayed, tp_delayed, td_delayed, \
         plat, plat_suppressed, plat_cis_suppressed, plat_confirmed, plat_source, \
         length) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, \
            $13, $14, $15, $16, $17, $18, $19, $20, $21) \
    ON CONFLICT (rid, tiploc, original_wt) DO UPDATE SET \
        (ta, tp, td, ta_source, tp_source, td_source, \
         ta_type, tp_type, td_type, ta_delayed, tp_delayed, td_delayed, \
         length, plat, plat_suppressed, plat_cis_suppressed, plat_confirmed, plat_source) = \
        (EXCLUDED.ta, EXCLUDED.tp, EXCLUDED.td, \
         EXCLUDED.ta_source, EXCLUDED.tp_source, EXCLUDED.td_source, \
         EXCLUDED.ta_type, EXCLUDED.tp_type, EXCLUDED.td_type, \
         EXCLUDED.ta_delayed, EXCLUDED.tp_delayed, EXCLUDED.td_delayed, \
         EXCLUDED.length, EXCLUDED.plat, EXCLUDED.plat_suppressed, \
         EXCLUDED.plat_cis_suppressed, EXCLUDED.plat_confirmed, EXCLUDED.plat_source);";

const UPSERT_MESSAGE: &str = "\
    INSERT INTO darwin_messages \
        (message_id, category, severity, suppress, stations, message) \
    VALUES ($1, $2, $3, $4, $5, $6) \
    ON CONFLICT (message_id) DO UPDATE SET \
        (category, severity, suppress, stations, message) = \
        (EXCLUDED.category, EXCLUDED.severity, EXCLUDED.suppress, \
         EXCLUDED.stations, EXCLUDED.message);";

const DELETE_MESSAGE: &str = "DELETE FROM darwin_messages WHERE message_id = $1;";

const UPSERT_SEQUENCE: &str = "\
    INSERT INTO last_received_sequence (id, sequence, time_acquired) \
    VALUES (0, $1, $2) \
    ON CONFLICT (id) DO UPDATE SET \
        sequence = EXCLUDED.sequence, time_acquired = EXCLUDED.time_acquired;";

/// Submits the write operations for one decoded frame, in order.
pub async fn store(
    records: &[DarwinRecord],
    refs: &ReferenceSnapshot,
    writer: &WriterHandle,
) -> Result<(), DatabaseError> {
    for op in build_ops(records, refs) {
        writer.submit(op).await?;
    }
    Ok(())
}

/// Records the broker sequence number for staleness detection.
pub fn sequence_op(sequence: i64, time_acquired: NaiveDateTime) -> WriteOp {
    WriteOp::Execute(Statement::new(
        UPSERT_SEQUENCE,
        vec![sequence.into(), time_acquired.into()],
    ))
}

/// Pure translation of records into operations; the writer executes them
/// in exactly this order.
pub fn build_ops(records: &[DarwinRecord], refs: &ReferenceSnapshot) -> Vec<WriteOp> {
    let mut ops = Vec::new();
    let mut association_rows: Vec<Vec<SqlValue>> = Vec::new();

    for record in records {
        match record {
            DarwinRecord::Schedule(schedule) => schedule_ops(schedule, refs, &mut ops),
            DarwinRecord::Status(status) => status_ops(status, refs, &mut ops),
            DarwinRecord::StationMessage(message) => message_ops(message, &mut ops),
            DarwinRecord::Deactivated(deactivated) => {
                ops.push(WriteOp::Execute(Statement::new(
                    DEACTIVATE_SCHEDULE,
                    vec![deactivated.rid.as_str().into()],
                )));
            }
            DarwinRecord::Association(association) => {
                let row = transform::association_row(association);
                association_rows.push(vec![
                    row.category.into(),
                    row.tiploc.into(),
                    row.main_rid.into(),
                    row.main_original_wt.into(),
                    row.assoc_rid.into(),
                    row.assoc_original_wt.into(),
                ]);
            }
        }
    }

    if !association_rows.is_empty() {
        ops.push(WriteOp::ExecuteBatch(BatchStatement::new(
            INSERT_ASSOCIATION,
            association_rows,
        )));
    }

    ops
}

/// Replaces a schedule: associations referencing the rid are retained
/// first (replacing the locations may cascade-delete them), locations are
/// deleted and re-inserted, the schedule row is upserted, and the retained
/// associations are conditionally re-inserted once their call points exist
/// again.
fn schedule_ops(record: &ScheduleRecord, refs: &ReferenceSnapshot, ops: &mut Vec<WriteOp>) {
    let rows = transform::schedule_rows(record, refs);

    ops.push(WriteOp::RetainAssociations {
        rid: record.rid.clone(),
    });
    ops.push(WriteOp::Execute(Statement::new(
        DELETE_LOCATIONS,
        vec![record.rid.as_str().into()],
    )));

    let schedule = rows.schedule;
    ops.push(WriteOp::Execute(Statement::new(
        UPSERT_SCHEDULE,
        vec![
            schedule.uid.into(),
            schedule.rid.into(),
            schedule.rsid.into(),
            schedule.ssd.into(),
            schedule.signalling_id.into(),
            schedule.status.into(),
            schedule.category.into(),
            schedule.operator.into(),
            schedule.is_active.into(),
            schedule.is_charter.into(),
            schedule.is_deleted.into(),
            schedule.is_passenger.into(),
            rows.origins.into(),
            rows.destinations.into(),
        ],
    )));

    if !rows.locations.is_empty() {
        let location_rows = rows
            .locations
            .into_iter()
            .map(|location| {
                vec![
                    location.rid.into(),
                    location.index.into(),
                    location.kind.as_str().into(),
                    location.tiploc.into(),
                    location.activity.into(),
                    location.original_wt.into(),
                    location.pta.into(),
                    location.wta.into(),
                    location.wtp.into(),
                    location.ptd.into(),
                    location.wtd.into(),
                    location.cancelled.into(),
                    location.rdelay.into(),
                ]
            })
            .collect();
        ops.push(WriteOp::ExecuteBatch(BatchStatement::new(
            INSERT_LOCATION,
            location_rows,
        )));
    }

    if let Some(reason) = rows.cancel_reason {
        ops.push(WriteOp::Execute(Statement::new(
            UPDATE_CANCEL_REASON,
            vec![reason.into(), record.rid.as_str().into()],
        )));
    }

    ops.push(WriteOp::InsertRetainedAssociations);
}

fn status_ops(record: &StatusRecord, refs: &ReferenceSnapshot, ops: &mut Vec<WriteOp>) {
    let rows = transform::status_rows(record);
    if !rows.is_empty() {
        let status_rows = rows
            .into_iter()
            .map(|status| {
                vec![
                    status.rid.into(),
                    status.tiploc.into(),
                    status.original_wt.into(),
                    status.arrival.time.into(),
                    status.pass.time.into(),
                    status.departure.time.into(),
                    status.arrival.source.into(),
                    status.pass.source.into(),
                    status.departure.source.into(),
                    status.arrival.kind.map(|kind| kind.as_str().to_owned()).into(),
                    status.pass.kind.map(|kind| kind.as_str().to_owned()).into(),
                    status
                        .departure
                        .kind
                        .map(|kind| kind.as_str().to_owned())
                        .into(),
                    status.arrival.delayed.into(),
                    status.pass.delayed.into(),
                    status.departure.delayed.into(),
                    status.platform.platform.into(),
                    status.platform.suppressed.into(),
                    status.platform.cis_suppressed.into(),
                    status.platform.confirmed.into(),
                    status.platform.source.into(),
                    status.length.into(),
                ]
            })
            .collect();
        ops.push(WriteOp::ExecuteBatch(BatchStatement::new(
            UPSERT_STATUS,
            status_rows,
        )));
    }

    if let Some(reason) = &record.late_reason {
        ops.push(WriteOp::Execute(Statement::new(
            UPDATE_DELAY_REASON,
            vec![
                transform::reason_value(reason, refs).into(),
                record.rid.as_str().into(),
            ],
        )));
    }
}

/// A station message with stations replaces the stored row; one without
/// any deletes it.
fn message_ops(record: &StationMessageRecord, ops: &mut Vec<WriteOp>) {
    let message = transform::station_message(record);
    if message.stations.is_empty() {
        ops.push(WriteOp::Execute(Statement::new(
            DELETE_MESSAGE,
            vec![message.id.into()],
        )));
    } else {
        ops.push(WriteOp::Execute(Statement::new(
            UPSERT_MESSAGE,
            vec![
                message.id.into(),
                message.category.into(),
                message.severity.into(),
                message.suppress.into(),
                message.stations.into(),
                message.body.into(),
            ],
        )));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::SqlValue;
    use darwin::parse::parse_darwin;

    fn ops_for(xml: &str) -> Vec<WriteOp> {
        let records = parse_darwin(xml).unwrap();
        build_ops(&records, &ReferenceSnapshot::default())
    }

    #[test]
    fn schedule_ops_run_in_replacement_order() {
        let ops = ops_for(
            r#"<Pport><uR>
                <schedule rid="R1" uid="U1" trainId="1A23" ssd="2021-06-01" toc="VT">
                    <OR tpl="A" wtd="10:00:00"/>
                    <DT tpl="B" wta="10:30:00"/>
                </schedule>
            </uR></Pport>"#,
        );
        assert_eq!(ops.len(), 5);
        assert!(matches!(&ops[0], WriteOp::RetainAssociations { rid } if rid == "R1"));
        assert!(matches!(&ops[1], WriteOp::Execute(s) if s.sql == DELETE_LOCATIONS));
        assert!(matches!(&ops[2], WriteOp::Execute(s) if s.sql == UPSERT_SCHEDULE));
        let WriteOp::ExecuteBatch(locations) = &ops[3] else {
            panic!("expected the location batch");
        };
        assert_eq!(locations.sql, INSERT_LOCATION);
        assert_eq!(locations.rows.len(), 2);
        assert_eq!(locations.rows[0][1], SqlValue::Int(Some(0)));
        assert_eq!(locations.rows[1][1], SqlValue::Int(Some(1)));
        assert!(matches!(&ops[4], WriteOp::InsertRetainedAssociations));
    }

    #[test]
    fn empty_schedule_still_deletes_and_upserts() {
        let ops = ops_for(
            r#"<Pport><uR>
                <schedule rid="R1" uid="U1" trainId="1A23" ssd="2021-06-01" toc="VT"/>
            </uR></Pport>"#,
        );
        assert_eq!(ops.len(), 4);
        assert!(matches!(&ops[1], WriteOp::Execute(s) if s.sql == DELETE_LOCATIONS));
        assert!(matches!(&ops[2], WriteOp::Execute(s) if s.sql == UPSERT_SCHEDULE));
    }

    #[test]
    fn cancel_reason_updates_after_the_schedule_row() {
        let ops = ops_for(
            r#"<Pport><uR>
                <schedule rid="R1" uid="U1" trainId="1A23" ssd="2021-06-01" toc="VT">
                    <OR tpl="A" wtd="10:00:00"/>
                    <cancelReason tiploc="A" near="true">100</cancelReason>
                </schedule>
            </uR></Pport>"#,
        );
        let reason_index = ops
            .iter()
            .position(|op| matches!(op, WriteOp::Execute(s) if s.sql == UPDATE_CANCEL_REASON))
            .unwrap();
        let schedule_index = ops
            .iter()
            .position(|op| matches!(op, WriteOp::Execute(s) if s.sql == UPSERT_SCHEDULE))
            .unwrap();
        assert!(reason_index > schedule_index);
        assert!(matches!(ops.last(), Some(WriteOp::InsertRetainedAssociations)));
    }

    #[test]
    fn status_ops_upsert_by_call_point_key() {
        let ops = ops_for(
            r#"<Pport><uR>
                <TS rid="R1" uid="U1" ssd="2021-06-01">
                    <Location tpl="A" wta="10:00:00">
                        <arr at="10:01:30" src="AUTO"/>
                    </Location>
                </TS>
            </uR></Pport>"#,
        );
        assert_eq!(ops.len(), 1);
        let WriteOp::ExecuteBatch(batch) = &ops[0] else {
            panic!("expected a status batch");
        };
        assert_eq!(batch.sql, UPSERT_STATUS);
        let row = &batch.rows[0];
        assert_eq!(row[0], SqlValue::Text(Some("R1".to_owned())));
        assert_eq!(row[2], SqlValue::Text(Some("100000            ".to_owned())));
        assert_eq!(row[9], SqlValue::Text(Some("A".to_owned())));
        assert_eq!(row[6], SqlValue::Text(Some("AUTO".to_owned())));
    }

    #[test]
    fn station_message_without_stations_deletes() {
        let ops = ops_for(
            r#"<Pport><uR>
                <OW id="M1" cat="X" sev="1"><Msg>gone</Msg></OW>
            </uR></Pport>"#,
        );
        assert!(matches!(&ops[0], WriteOp::Execute(s) if s.sql == DELETE_MESSAGE));

        let ops = ops_for(
            r#"<Pport><uR>
                <OW id="M1" cat="X" sev="1"><Station crs="KGX"/><Msg>hi</Msg></OW>
            </uR></Pport>"#,
        );
        let WriteOp::Execute(statement) = &ops[0] else {
            panic!("expected an upsert");
        };
        assert_eq!(statement.sql, UPSERT_MESSAGE);
        assert_eq!(
            statement.params[4],
            SqlValue::TextArray(vec!["KGX".to_owned()])
        );
    }

    #[test]
    fn associations_batch_at_the_end_of_the_frame() {
        let ops = ops_for(
            r#"<Pport><uR>
                <association category="NP" tiploc="CREWE">
                    <main rid="A" wtd="11:00:00"/>
                    <assoc rid="B" wtd="11:04:00"/>
                </association>
                <deactivated rid="R9"/>
            </uR></Pport>"#,
        );
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[0], WriteOp::Execute(s) if s.sql == DEACTIVATE_SCHEDULE));
        let WriteOp::ExecuteBatch(batch) = &ops[1] else {
            panic!("expected the association batch");
        };
        assert_eq!(batch.sql, INSERT_ASSOCIATION);
        assert_eq!(batch.rows[0][0], SqlValue::Text(Some("NP".to_owned())));
    }

    #[test]
    fn deactivation_only_touches_the_active_flag() {
        let ops = ops_for(r#"<Pport><uR><deactivated rid="R1"/></uR></Pport>"#);
        assert_eq!(ops.len(), 1);
        let WriteOp::Execute(statement) = &ops[0] else {
            panic!("expected an update");
        };
        assert!(statement.sql.contains("is_active = FALSE"));
        assert_eq!(statement.params, vec![SqlValue::Text(Some("R1".to_owned()))]);
    }
}
