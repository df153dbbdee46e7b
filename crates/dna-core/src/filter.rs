//! Flow filtering
//!
//! Drops traffic records that cannot name a service: no destination
//! hostname, a cloud-assigned ephemeral compute name, or a hostname that is
//! really an address. The stage is pure and never fails.

use crate::config::FilterConfig;
use crate::model::FlowRecord;
use std::collections::HashSet;
use std::net::IpAddr;
use tracing::debug;

/// Removes noise records from raw traffic
#[derive(Debug, Clone)]
pub struct FlowFilter {
    cloud_marker: String,
    reject_ip_style: bool,
    deduplicate: bool,
}

impl FlowFilter {
    /// Create a filter from configuration
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            cloud_marker: config.cloud_marker.to_lowercase(),
            reject_ip_style: config.reject_ip_style_hostnames,
            deduplicate: config.deduplicate,
        }
    }

    /// Whether a single destination hostname survives the filter
    pub fn accepts(&self, hostname: &str) -> bool {
        let hostname = hostname.trim();
        if hostname.is_empty() {
            return false;
        }
        if !self.cloud_marker.is_empty() && hostname.to_lowercase().contains(&self.cloud_marker) {
            return false;
        }
        if is_ip_literal(hostname) {
            return false;
        }
        if self.reject_ip_style && is_ip_style_hostname(hostname) {
            return false;
        }
        true
    }

    /// Filter records, preserving order
    pub fn apply(&self, records: Vec<FlowRecord>) -> Vec<FlowRecord> {
        let total = records.len();
        let mut seen = HashSet::new();

        let kept: Vec<FlowRecord> = records
            .into_iter()
            .filter(|record| self.accepts(&record.destination_hostname))
            .filter(|record| {
                !self.deduplicate
                    || seen.insert((
                        record.destination_hostname.trim().to_lowercase(),
                        record.destination_address,
                    ))
            })
            .collect();

        debug!("Flow filter kept {} of {} records", kept.len(), total);
        kept
    }
}

/// True when the hostname parses as an IPv4 or IPv6 literal
fn is_ip_literal(hostname: &str) -> bool {
    let bare = hostname.trim_start_matches('[').trim_end_matches(']');
    bare.parse::<IpAddr>().is_ok()
}

/// True for dash-encoded IPv4 names: optional `ip-`, four octets, then end or `.`
fn is_ip_style_hostname(hostname: &str) -> bool {
    let lower = hostname.to_lowercase();
    let rest = lower.strip_prefix("ip-").unwrap_or(&lower);
    let head = rest.split('.').next().unwrap_or_default();

    let octets: Vec<&str> = head.split('-').collect();
    octets.len() == 4 && octets.iter().all(|o| is_octet(o))
}

fn is_octet(part: &str) -> bool {
    if part.is_empty() || part.len() > 3 || !part.bytes().all(|b| b.is_ascii_digit()) {
        return false;
    }
    if part.len() > 1 && part.starts_with('0') {
        return false;
    }
    part.parse::<u16>().map(|v| v <= 255).unwrap_or(false)
}
