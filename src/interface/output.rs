//! Parsers for `awg show` text output.

use super::PeerDump;

/// Endpoint token meaning "no endpoint"
const NO_ENDPOINT: &str = "(none)";

/// Minimum tab-separated columns on a peer line of `awg show <if> dump`
const DUMP_PEER_COLUMNS: usize = 7;

/// Find `key: value` in free-text output. Keys match case-insensitively at
/// the start of a line (after indentation); the first match wins.
pub(crate) fn extract_value(output: &str, key: &str) -> Option<String> {
    let wanted = format!("{}:", key.to_ascii_lowercase());
    output.lines().find_map(|line| {
        let line = line.trim_start();
        let head = line.get(..wanted.len())?;
        if !head.eq_ignore_ascii_case(&wanted) {
            return None;
        }
        let value = line[wanted.len()..].trim();
        (!value.is_empty()).then(|| value.to_string())
    })
}

/// Parse a numeric `key: value` field
pub(crate) fn extract_number<T: std::str::FromStr>(output: &str, key: &str) -> Option<T> {
    extract_value(output, key)?.parse().ok()
}

/// Parse the peer table of `awg show <if> dump`.
///
/// The first line describes the interface itself and is skipped. Peer lines
/// carry public key, preshared key, endpoint, allowed ips, latest handshake,
/// rx and tx bytes. Lines with fewer columns are skipped.
pub(crate) fn parse_peer_dump(dump: &str) -> Vec<PeerDump> {
    dump.lines()
        .skip(1)
        .filter(|line| !line.trim().is_empty())
        .filter_map(parse_peer_line)
        .collect()
}

fn parse_peer_line(line: &str) -> Option<PeerDump> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < DUMP_PEER_COLUMNS {
        tracing::debug!("Skipping malformed dump line with {} columns", parts.len());
        return None;
    }

    Some(PeerDump {
        public_key: parts[0].to_string(),
        endpoint: match parts[2] {
            NO_ENDPOINT | "" => None,
            endpoint => Some(endpoint.to_string()),
        },
        allowed_ips: parts[3].to_string(),
        latest_handshake: parts[4].trim().parse::<i64>().ok().filter(|&t| t > 0),
        transfer_rx: parts[5].trim().parse().unwrap_or(0),
        transfer_tx: parts[6].trim().parse().unwrap_or(0),
    })
}
