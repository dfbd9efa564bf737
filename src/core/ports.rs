//! # Port allocation.
//!
//! [`allocate`] picks the port for one worker given every *other* worker's holding.
//! It is pure; the registry calls it under its lock and stores the result, so two
//! reservations can never observe the same free port.
//!
//! ## Rules (first match wins)
//! 1. the worker's current port, if in range and not held by another **active** worker;
//! 2. the caller's preferred port, if in range and not held by another **active** worker;
//! 3. for `worker-N` ids, the ordinal port `start + N - 1` (wrapping to `start`),
//!    if no other record holds it;
//! 4. the lowest port in the range held by no other record;
//! 5. otherwise [`SupervisorError::PortRangeExhausted`].
//!
//! A worker waiting on a backoff restart counts as active: its port is never handed out.

use crate::config::PortRange;
use crate::error::SupervisorError;
use crate::records::worker_ordinal;

/// A port held by another worker record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Holding {
    pub port: u16,
    /// Holder is `starting`, `running`, `stopping` or armed for a backoff restart.
    pub active: bool,
}

pub(crate) fn allocate(
    range: PortRange,
    id: &str,
    current: Option<u16>,
    preferred: Option<u16>,
    others: &[Holding],
) -> Result<u16, SupervisorError> {
    let held_active = |port: u16| others.iter().any(|h| h.active && h.port == port);
    let held = |port: u16| others.iter().any(|h| h.port == port);
    let usable = |port: &u16| range.contains(*port) && !held_active(*port);

    if let Some(port) = current.filter(usable) {
        return Ok(port);
    }
    if let Some(port) = preferred.filter(usable) {
        return Ok(port);
    }
    if let Some(n) = worker_ordinal(id) {
        let port = range.for_ordinal(n);
        if !held(port) {
            return Ok(port);
        }
    }

    range
        .iter()
        .find(|p| !held(*p))
        .ok_or(SupervisorError::PortRangeExhausted {
            start: range.start,
            end: range.end,
        })
}
