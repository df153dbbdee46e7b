// # CSV Exports and Payloads
//
// Parsing of the workloader exports (address lists, flows, labels,
// workloads) and writing of the import payloads.
//
// Exports are read leniently: headers are matched by name with a few
// spellings, some flow columns fall back to fixed positions, and rows that
// cannot be used are skipped with a warning.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::{ReaderBuilder, StringRecord, Writer};
use dna_core::model::MEMBER_SEPARATOR;
use dna_core::{AddressList, Error, FlowRecord, Result};
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, warn};

/// Position of `Destination FQDN` when the header is missing
const DESTINATION_FQDN_FALLBACK: usize = 25;

/// Position of `Destination IP` when the header is missing
const DESTINATION_IP_FALLBACK: usize = 14;

/// Position of the app label in workload exports when the header is missing
const WORKLOAD_APP_FALLBACK: usize = 7;

/// Header row of the create payload
pub const CREATE_HEADER: [&str; 4] = ["name", "description", "include", "fqdns"];

/// Header row of the update payload
pub const UPDATE_HEADER: [&str; 4] = ["href", "description", "include", "fqdns"];

/// A CSV file with its header row
#[derive(Debug, Clone, Default)]
pub struct Table {
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl Table {
    /// Read a CSV file with a header row
    pub fn read(path: &Path) -> std::result::Result<Self, String> {
        let mut reader = ReaderBuilder::new()
            .flexible(true)
            .from_path(path)
            .map_err(|e| format!("{}: {}", path.display(), e))?;
        let headers = reader
            .headers()
            .map_err(|e| format!("{}: {}", path.display(), e))?
            .clone();

        let mut rows = Vec::new();
        for (line, record) in reader.records().enumerate() {
            match record {
                Ok(record) => rows.push(record),
                Err(e) => warn!("{}: skipping unreadable row {}: {}", path.display(), line + 2, e),
            }
        }
        Ok(Self { headers, rows })
    }

    /// Index of the first header matching one of `names` (case-insensitive)
    pub fn column(&self, names: &[&str]) -> Option<usize> {
        names.iter().find_map(|name| {
            self.headers
                .iter()
                .position(|header| header.trim().eq_ignore_ascii_case(name))
        })
    }

    /// Number of data rows
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Whether the table has no data row
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Data rows
    pub fn rows(&self) -> impl Iterator<Item = &StringRecord> {
        self.rows.iter()
    }
}

/// Trimmed cell value, empty when the column or cell is missing
pub fn cell(row: &StringRecord, column: Option<usize>) -> &str {
    column.and_then(|index| row.get(index)).map(str::trim).unwrap_or_default()
}

/// Parse the address list export
///
/// Rows without a name or href are skipped; so are `include` members that
/// are not single addresses (ranges, CIDR blocks, exclusions).
pub fn read_address_lists(path: &Path) -> Result<Vec<AddressList>> {
    let table = Table::read(path).map_err(Error::store)?;
    let name = table.column(&["name"]);
    let description = table.column(&["description"]);
    let include = table.column(&["include"]);
    let fqdns = table.column(&["fqdns", "fqdn"]);
    let href = table.column(&["href"]);

    if name.is_none() || href.is_none() {
        return Err(Error::store(format!(
            "{}: address list export has no name/href column",
            path.display()
        )));
    }

    let mut lists = Vec::with_capacity(table.len());
    for row in table.rows() {
        let list_name = cell(row, name);
        let list_href = cell(row, href);
        if list_name.is_empty() || list_href.is_empty() {
            warn!("Skipping address list row without name or href: {:?}", row);
            continue;
        }

        let mut list = AddressList::existing(list_href, list_name, cell(row, description))
            .with_hostnames(members(cell(row, fqdns)));
        for member in members(cell(row, include)) {
            match member.parse::<IpAddr>() {
                Ok(address) => {
                    list.addresses.insert(address);
                }
                Err(_) => warn!("{}: ignoring include entry {:?}", list_name, member),
            }
        }
        lists.push(list);
    }

    debug!("Read {} address list(s) from {}", lists.len(), path.display());
    Ok(lists)
}

fn members(field: &str) -> impl Iterator<Item = &str> {
    field
        .split(MEMBER_SEPARATOR)
        .map(str::trim)
        .filter(|member| !member.is_empty())
}

/// Parse a flow export
///
/// Rows whose destination address cannot be parsed are skipped. Rows
/// without a parseable timestamp are stamped with `default_timestamp`.
pub fn read_flows(path: &Path, default_timestamp: DateTime<Utc>) -> Result<Vec<FlowRecord>> {
    let table = Table::read(path).map_err(Error::traffic)?;
    let fqdn = table
        .column(&["Destination FQDN", "destination_fqdn"])
        .or(Some(DESTINATION_FQDN_FALLBACK));
    let ip = table
        .column(&["Destination IP", "destination_ip"])
        .or(Some(DESTINATION_IP_FALLBACK));
    let source = table.column(&["Source Hostname"]);
    let source_ip = table.column(&["Source IP"]);
    let last_detected = table.column(&["Last Detected"]);
    let first_detected = table.column(&["First Detected"]);

    let mut flows = Vec::with_capacity(table.len());
    let mut skipped = 0usize;
    for row in table.rows() {
        let Ok(address) = cell(row, ip).parse::<IpAddr>() else {
            skipped += 1;
            continue;
        };

        let origin = match cell(row, source) {
            "" => cell(row, source_ip),
            hostname => hostname,
        };
        let timestamp = parse_timestamp(cell(row, last_detected))
            .or_else(|| parse_timestamp(cell(row, first_detected)))
            .unwrap_or(default_timestamp);

        flows.push(FlowRecord::new(origin, address, cell(row, fqdn), timestamp));
    }

    if skipped > 0 {
        warn!("{}: skipped {} row(s) without a destination address", path.display(), skipped);
    }
    debug!("Read {} flow record(s) from {}", flows.len(), path.display());
    Ok(flows)
}

/// RFC 3339, `YYYY-MM-DD HH:MM:SS` or a bare date (taken as midnight UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(timestamp) = DateTime::parse_from_rfc3339(raw) {
        return Some(timestamp.with_timezone(&Utc));
    }
    if let Ok(timestamp) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(timestamp.and_utc());
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|timestamp| timestamp.and_utc())
}

/// One row of the label export
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Label {
    /// Label key (`app`, `env`, ...)
    pub key: String,
    /// Label value
    pub value: String,
    /// Label href
    pub href: String,
}

/// Parse the label export; rows without an href are dropped
pub fn read_labels(path: &Path) -> Result<Vec<Label>> {
    let table = Table::read(path).map_err(Error::traffic)?;
    let key = table.column(&["key"]);
    let value = table.column(&["value"]);
    let href = table.column(&["href"]);

    Ok(table
        .rows()
        .map(|row| Label {
            key: cell(row, key).to_string(),
            value: cell(row, value).to_string(),
            href: cell(row, href).to_string(),
        })
        .filter(|label| !label.href.is_empty())
        .collect())
}

/// App label values of managed workloads
pub fn read_workload_apps(path: &Path) -> Result<Vec<String>> {
    let table = Table::read(path).map_err(Error::traffic)?;
    let app = table.column(&["app"]).or(Some(WORKLOAD_APP_FALLBACK));

    Ok(table
        .rows()
        .map(|row| cell(row, app).to_string())
        .filter(|value| !value.is_empty())
        .collect())
}

/// Write the create payload
pub fn write_create_payload(path: &Path, lists: &[AddressList]) -> Result<()> {
    write_payload(path, &CREATE_HEADER, lists, |list| {
        Ok([
            list.name.clone(),
            list.description.clone(),
            list.include_field(),
            list.hostnames_field(),
        ])
    })
}

/// Write the update payload; every list needs an identifier
pub fn write_update_payload(path: &Path, lists: &[AddressList]) -> Result<()> {
    write_payload(path, &UPDATE_HEADER, lists, |list| {
        let href = list
            .identifier
            .clone()
            .ok_or_else(|| Error::store(format!("List {} has no href", list.name)))?;
        Ok([href, list.description.clone(), list.include_field(), list.hostnames_field()])
    })
}

fn write_payload(
    path: &Path,
    header: &[&str; 4],
    lists: &[AddressList],
    row: impl Fn(&AddressList) -> Result<[String; 4]>,
) -> Result<()> {
    let failed = |e: csv::Error| Error::store(format!("{}: {}", path.display(), e));

    let mut writer = Writer::from_path(path).map_err(failed)?;
    writer.write_record(header).map_err(failed)?;
    for list in lists {
        writer.write_record(row(list)?).map_err(failed)?;
    }
    writer.flush()?;
    debug!("Wrote {} row(s) to {}", lists.len(), path.display());
    Ok(())
}
