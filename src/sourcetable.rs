//! Caster sourcetable retrieval and parsing.
//!
//! A sourcetable is the caster's catalogue of available mountpoints:
//! semicolon-separated `STR` records, one per line, ending with
//! `ENDSOURCETABLE`. Parsing is a pure function over the response body;
//! fetching speaks the same HTTP-shaped plaintext as the session handshake.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::config::StationConfig;
use crate::error::{MonitorError, Result};

/// Deadline for the whole fetch: connect, request, and body.
const FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Cap on the response body; a sourcetable larger than this is malformed.
const MAX_BODY: usize = 1024 * 1024;

// STR record field indices, per the NTRIP sourcetable format. Field 0 is
// the "STR" tag itself.
const FIELD_MOUNT: usize = 1;
const FIELD_NAME: usize = 2;
const FIELD_FORMAT: usize = 3;
const FIELD_CARRIER: usize = 5;
const FIELD_NAV_SYSTEMS: usize = 6;
const FIELD_LAT: usize = 9;
const FIELD_LON: usize = 10;
const MIN_FIELDS: usize = 11;

/// One `STR` record from a caster's sourcetable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MountpointRecord {
    pub mount: String,
    pub name: String,
    /// Correction format identifier, e.g. `RTCM 3.2`.
    pub format: String,
    /// Carrier phase information level (0, 1, or 2).
    pub carrier: String,
    /// Navigation systems string, e.g. `GPS+GLO+GAL`.
    pub nav_systems: String,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl MountpointRecord {
    /// Seed a station configuration from this record. Credentials start
    /// empty; the caller fills them in.
    pub fn to_station_config(&self, host: &str, port: u16) -> StationConfig {
        StationConfig {
            name: if self.name.is_empty() { self.mount.clone() } else { self.name.clone() },
            host: host.to_string(),
            port,
            mount: self.mount.clone(),
            user: String::new(),
            password: String::new(),
            lat: self.lat,
            lon: self.lon,
            alt: None,
        }
    }
}

/// Parse `STR` records out of a sourcetable body.
///
/// Non-`STR` lines (`CAS`, `NET`, headers, the terminator) are skipped, as
/// are `STR` lines with too few fields. Zero or unparseable coordinates
/// become `None`: casters routinely publish `0.00;0.00` for mountpoints
/// they have no position for.
pub fn parse_sourcetable(body: &str) -> Vec<MountpointRecord> {
    body.lines()
        .filter_map(|line| {
            let line = line.trim();
            let fields: Vec<&str> = line.split(';').collect();
            if fields.first() != Some(&"STR") || fields.len() < MIN_FIELDS {
                return None;
            }
            Some(MountpointRecord {
                mount: fields[FIELD_MOUNT].to_string(),
                name: fields[FIELD_NAME].to_string(),
                format: fields[FIELD_FORMAT].to_string(),
                carrier: fields[FIELD_CARRIER].to_string(),
                nav_systems: fields[FIELD_NAV_SYSTEMS].to_string(),
                lat: parse_coord(fields[FIELD_LAT]),
                lon: parse_coord(fields[FIELD_LON]),
            })
        })
        .collect()
}

fn parse_coord(field: &str) -> Option<f64> {
    match field.trim().parse::<f64>() {
        Ok(v) if v != 0.0 => Some(v),
        _ => None,
    }
}

/// Fetch and parse a caster's sourcetable. Most casters serve the table
/// anonymously; pass credentials for the ones that require them.
pub async fn fetch_sourcetable(
    host: &str,
    port: u16,
    auth: Option<(&str, &str)>,
) -> Result<Vec<MountpointRecord>> {
    let body = tokio::time::timeout(FETCH_TIMEOUT, fetch_body(host, port, auth))
        .await
        .map_err(|_| MonitorError::Timeout { duration: FETCH_TIMEOUT })??;

    let records = parse_sourcetable(&body);
    debug!(host, port, mountpoints = records.len(), "Fetched sourcetable");
    if records.is_empty() && !body.contains("ENDSOURCETABLE") {
        return Err(MonitorError::Sourcetable {
            reason: "response contained no sourcetable".to_string(),
        });
    }
    Ok(records)
}

async fn fetch_body(host: &str, port: u16, auth: Option<(&str, &str)>) -> Result<String> {
    use base64::Engine as _;

    let mut stream = TcpStream::connect((host, port))
        .await
        .map_err(|err| {
            MonitorError::connect_failed_with_source(format!("{host}:{port}"), Box::new(err))
        })?;

    let auth_header = auth
        .map(|(user, password)| {
            let encoded = base64::engine::general_purpose::STANDARD
                .encode(format!("{user}:{password}"));
            format!("Authorization: Basic {encoded}\r\n")
        })
        .unwrap_or_default();
    let request = format!(
        "GET / HTTP/1.1\r\nHost: {host}\r\nNtrip-Version: Ntrip/2.0\r\nUser-Agent: NTRIP ntripmon/{}\r\n{auth_header}Connection: close\r\n\r\n",
        env!("CARGO_PKG_VERSION"),
    );
    stream
        .write_all(request.as_bytes())
        .await
        .map_err(|err| MonitorError::io_error("writing sourcetable request", err))?;

    let mut body = Vec::with_capacity(8192);
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|err| MonitorError::io_error("reading sourcetable", err))?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..n]);
        if body.len() > MAX_BODY {
            return Err(MonitorError::Sourcetable {
                reason: format!("response exceeded {MAX_BODY} bytes"),
            });
        }
        // Casters terminate the table explicitly; stop without waiting for
        // the connection to close.
        if body.windows(14).any(|w| w == b"ENDSOURCETABLE") {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&body).into_owned())
}
