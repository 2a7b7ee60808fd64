//! Purge operations for the snapshot bootstrap.

use crate::writer::{Statement, WriteOp};

/// Empties every live schedule-family table in the enclosing transaction.
/// User triggers on the schedules table are suspended around the truncate
/// so a schema-side cascade cannot fire against the purge itself.
pub fn purge_ops() -> Vec<WriteOp> {
    vec![
        WriteOp::Execute(Statement::new(
            "ALTER TABLE darwin_schedules DISABLE TRIGGER USER;",
            vec![],
        )),
        WriteOp::Execute(Statement::new(
            "TRUNCATE TABLE darwin_schedule_locations, darwin_schedule_status, \
             darwin_associations, darwin_schedules, darwin_messages;",
            vec![],
        )),
        WriteOp::Execute(Statement::new(
            "ALTER TABLE darwin_schedules ENABLE TRIGGER USER;",
            vec![],
        )),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn purge_covers_all_five_live_tables() {
        let ops = purge_ops();
        assert_eq!(ops.len(), 3);
        let WriteOp::Execute(truncate) = &ops[1] else {
            panic!("expected the truncate statement");
        };
        for table in [
            "darwin_schedule_locations",
            "darwin_schedule_status",
            "darwin_associations",
            "darwin_schedules",
            "darwin_messages",
        ] {
            assert!(truncate.sql.contains(table), "missing {}", table);
        }
    }
}
