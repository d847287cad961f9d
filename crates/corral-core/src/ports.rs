use corral_schema::{PortMapping, PortRange};
use std::collections::HashSet;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AllocError {
    #[error("host port {port} is already in use")]
    PortConflict { port: u16 },
    #[error("no free host port left in {low}-{high}")]
    RangeExhausted { low: u16, high: u16 },
}

/// Assign host ports to `requested` given the ports already taken.
///
/// Mappings are handled in request order. An explicit host port must not be
/// in `used` or already given to an earlier mapping of the same request. An
/// unset host port gets the lowest port in `range` not taken so far. Pure and
/// deterministic: on failure nothing from this call is returned.
pub fn allocate(
    used: &HashSet<u16>,
    requested: &[PortMapping],
    range: PortRange,
) -> Result<Vec<PortMapping>, AllocError> {
    let mut taken = used.clone();
    let mut assigned = Vec::with_capacity(requested.len());

    for mapping in requested {
        let mut mapping = mapping.clone();
        match mapping.host_port {
            Some(port) => {
                if !taken.insert(port) {
                    return Err(AllocError::PortConflict { port });
                }
            }
            None => {
                let port = range
                    .iter()
                    .find(|p| !taken.contains(p))
                    .ok_or(AllocError::RangeExhausted {
                        low: range.low,
                        high: range.high,
                    })?;
                taken.insert(port);
                mapping.host_port = Some(port);
            }
        }
        assigned.push(mapping);
    }

    Ok(assigned)
}
