use ghostwire_core::PortMapping;

const DEFAULT_HOST: &str = "127.0.0.1";

#[derive(Debug, thiserror::Error)]
pub enum PortMappingError {
    #[error("empty port mapping")]
    Empty,
    #[error("invalid port mapping {0:?}: {1}")]
    Malformed(String, &'static str),
    #[error("invalid port number in {0:?}")]
    InvalidPort(String),
    #[error("port range {0:?} is backwards (low > high)")]
    BackwardsRange(String),
}

/// Parses one `[tunnels] ports` entry into one or more [`PortMapping`]s.
///
/// Accepted forms (grounded on the original implementation's own examples):
/// - `local_port=remote_port` — both bind and remote host default to
///   `127.0.0.1`.
/// - `local_lo-local_hi:remote_port` — a local port range, one mapping per
///   port in the range, all routed to the same remote target.
/// - `bind_host:local_port=remote_host:remote_port` — fully explicit form.
///
/// The separator between the local and remote halves is `=` when present;
/// otherwise the last `:` in the string splits them (this lets a local
/// port range use `:` without an explicit bind host, as in the second
/// form above).
pub fn parse_port_mapping(spec: &str) -> Result<Vec<PortMapping>, PortMappingError> {
    let spec = spec.trim();
    if spec.is_empty() {
        return Err(PortMappingError::Empty);
    }

    let (local_part, remote_part) = if let Some(idx) = spec.find('=') {
        (&spec[..idx], &spec[idx + 1..])
    } else if let Some(idx) = spec.rfind(':') {
        (&spec[..idx], &spec[idx + 1..])
    } else {
        return Err(PortMappingError::Malformed(
            spec.to_string(),
            "missing '=' or ':' separating local and remote",
        ));
    };

    if local_part.is_empty() || remote_part.is_empty() {
        return Err(PortMappingError::Malformed(
            spec.to_string(),
            "local and remote parts must both be non-empty",
        ));
    }

    let (bind_host, port_spec) = match local_part.rfind(':') {
        Some(idx) => (&local_part[..idx], &local_part[idx + 1..]),
        None => (DEFAULT_HOST, local_part),
    };

    let (remote_host, remote_port_str) = match remote_part.rfind(':') {
        Some(idx) => (&remote_part[..idx], &remote_part[idx + 1..]),
        None => (DEFAULT_HOST, remote_part),
    };
    let remote_port = parse_port(remote_port_str, spec)?;

    let local_ports = parse_local_ports(port_spec, spec)?;

    Ok(local_ports
        .into_iter()
        .map(|bind_port| PortMapping {
            bind_host: bind_host.to_string(),
            bind_port,
            remote_host: remote_host.to_string(),
            remote_port,
        })
        .collect())
}

fn parse_local_ports(port_spec: &str, original: &str) -> Result<Vec<u16>, PortMappingError> {
    if let Some((lo, hi)) = port_spec.split_once('-') {
        let lo = parse_port(lo, original)?;
        let hi = parse_port(hi, original)?;
        if lo > hi {
            return Err(PortMappingError::BackwardsRange(original.to_string()));
        }
        Ok((lo..=hi).collect())
    } else {
        Ok(vec![parse_port(port_spec, original)?])
    }
}

fn parse_port(raw: &str, original: &str) -> Result<u16, PortMappingError> {
    raw.trim()
        .parse::<u16>()
        .map_err(|_| PortMappingError::InvalidPort(original.to_string()))
}
