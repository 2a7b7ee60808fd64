//! Network-topology rows from the BPlan extract.

use chrono::NaiveDate;

use crate::writer::{BatchStatement, WriteOp};

const UPSERT_NETWORK_LINK: &str = "\
    INSERT INTO bplan_network_links \
        (origin, destination, running_line_code, running_line_desc, \
         start_date, end_date, initial_direction, final_direction, distance, \
         doo_passenger, doo_non_passenger, retb, zone, reversible, power, \
         route_allowance) \
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16) \
    ON CONFLICT (origin, destination, running_line_code) DO UPDATE SET \
        (running_line_desc, start_date, end_date, initial_direction, \
         final_direction, distance, doo_passenger, doo_non_passenger, retb, \
         zone, reversible, power, route_allowance) = \
        (EXCLUDED.running_line_desc, EXCLUDED.start_date, EXCLUDED.end_date, \
         EXCLUDED.initial_direction, EXCLUDED.final_direction, EXCLUDED.distance, \
         EXCLUDED.doo_passenger, EXCLUDED.doo_non_passenger, EXCLUDED.retb, \
         EXCLUDED.zone, EXCLUDED.reversible, EXCLUDED.power, \
         EXCLUDED.route_allowance);";

/// One NWK record of the BPlan export.
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkLink {
    pub origin: String,
    pub destination: String,
    pub running_line_code: String,
    pub running_line_desc: Option<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub initial_direction: Option<String>,
    pub final_direction: Option<String>,
    pub distance: Option<i32>,
    pub doo_passenger: bool,
    pub doo_non_passenger: bool,
    pub retb: bool,
    pub zone: Option<String>,
    pub reversible: Option<String>,
    pub power: Option<String>,
    pub route_allowance: Option<String>,
}

pub fn network_link_batch(links: Vec<NetworkLink>) -> WriteOp {
    let rows = links
        .into_iter()
        .map(|link| {
            vec![
                link.origin.into(),
                link.destination.into(),
                link.running_line_code.into(),
                link.running_line_desc.into(),
                link.start_date.into(),
                link.end_date.into(),
                link.initial_direction.into(),
                link.final_direction.into(),
                link.distance.into(),
                link.doo_passenger.into(),
                link.doo_non_passenger.into(),
                link.retb.into(),
                link.zone.into(),
                link.reversible.into(),
                link.power.into(),
                link.route_allowance.into(),
            ]
        })
        .collect();
    WriteOp::ExecuteBatch(BatchStatement::new(UPSERT_NETWORK_LINK, rows))
}
