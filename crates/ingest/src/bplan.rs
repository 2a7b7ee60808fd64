//! BPlan network-topology import.
//!
//! The BPlan export is a Windows-1252 tab-separated file; only NWK
//! (network link) records are merged. Some date columns carry a time of
//! 23:59:59 meaning "end of that day", so timestamps are nudged forward a
//! second before truncating to a date.

use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime};

use database::store::bplan::{network_link_batch, NetworkLink};
use database::writer::{WriteOp, WriterHandle};

use crate::error::IngestError;

const NWK_FIELDS: usize = 19;

/// Merges the network links from a BPlan extract; returns how many.
pub async fn import_bplan(
    path: &Path,
    writer: &WriterHandle,
) -> Result<usize, IngestError> {
    log::info!("merging bplan from {}", path.display());
    let path: PathBuf = path.to_owned();
    let links = tokio::task::spawn_blocking(move || read_network_links(&path)).await??;
    let count = links.len();

    writer.submit(WriteOp::Begin).await?;
    writer.submit(network_link_batch(links)).await?;
    writer.submit(WriteOp::Commit).await?;
    Ok(count)
}

fn read_network_links(path: &Path) -> Result<Vec<NetworkLink>, IngestError> {
    let raw = std::fs::read(path)?;
    let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&raw);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .from_reader(decoded.as_bytes());

    let mut links = Vec::new();
    for record in reader.records() {
        let record = record
            .map_err(|why| {
                IngestError::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    why,
                ))
            })?;
        if record.get(0) != Some("NWK") || record.len() < NWK_FIELDS {
            continue;
        }
        links.push(NetworkLink {
            origin: field(&record, 2),
            destination: field(&record, 3),
            running_line_code: field(&record, 4),
            running_line_desc: optional(&record, 5),
            start_date: parse_bplan_date(record.get(6).unwrap_or("")),
            end_date: parse_bplan_date(record.get(7).unwrap_or("")),
            initial_direction: optional(&record, 8),
            final_direction: optional(&record, 9),
            distance: record.get(10).and_then(|raw| raw.parse().ok()),
            doo_passenger: record.get(11) == Some("Y"),
            doo_non_passenger: record.get(12) == Some("Y"),
            retb: record.get(13) == Some("Y"),
            zone: optional(&record, 14),
            reversible: optional(&record, 15),
            power: optional(&record, 16),
            route_allowance: optional(&record, 17),
        });
    }
    Ok(links)
}

fn field(record: &csv::StringRecord, index: usize) -> String {
    record.get(index).unwrap_or("").to_owned()
}

fn optional(record: &csv::StringRecord, index: usize) -> Option<String> {
    record
        .get(index)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
}

/// "DD-MM-YYYY HH:MM:SS", offset by one second before dropping the time.
fn parse_bplan_date(raw: &str) -> Option<NaiveDate> {
    if raw.is_empty() {
        return None;
    }
    NaiveDateTime::parse_from_str(raw, "%d-%m-%Y %H:%M:%S")
        .ok()
        .map(|stamp| (stamp + Duration::seconds(1)).date())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_of_day_dates_roll_forward() {
        assert_eq!(
            parse_bplan_date("31-05-2021 23:59:59"),
            Some(NaiveDate::from_ymd_opt(2021, 6, 1).unwrap())
        );
        assert_eq!(
            parse_bplan_date("31-05-2021 00:00:00"),
            Some(NaiveDate::from_ymd_opt(2021, 5, 31).unwrap())
        );
        assert_eq!(parse_bplan_date(""), None);
        assert_eq!(parse_bplan_date("not a date"), None);
    }

    #[test]
    fn only_nwk_records_are_read() {
        let data = "PIF\t1\nNWK\tA\tEUSTON\tMKNSCEN\tFL\tFast Line\t\
                    01-01-2020 00:00:00\t31-12-2024 23:59:59\tU\tD\t7940\tY\tN\tN\t\
                    LNW\tB\tAC\tRA1\t0\nPLT\tX\tY\n";
        let mut reader = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(data.as_bytes());
        let records: Vec<_> = reader.records().collect::<Result<_, _>>().unwrap();
        assert_eq!(records.len(), 3);

        // Mirror read_network_links' filter.
        let nwk: Vec<_> = records
            .iter()
            .filter(|record| record.get(0) == Some("NWK") && record.len() >= NWK_FIELDS)
            .collect();
        assert_eq!(nwk.len(), 1);
        assert_eq!(nwk[0].get(2), Some("EUSTON"));
        assert_eq!(nwk[0].get(11), Some("Y"));
    }
}
