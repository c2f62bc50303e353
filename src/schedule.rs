//! Time-division slot computation.
//!
//! Transmission rights rotate among the participating nodes in strict
//! round-robin order, one second per node. The slot is recomputed from
//! wall-clock time on every tick rather than stored, so independently
//! started nodes with synchronized clocks agree on whose turn it is.

/// Dwell time of a single transmit slot.
pub const SLOT_DURATION_MS: u64 = 1000;

/// Returns the identifier of the node that owns the transmit slot at
/// `now_ms` (milliseconds since the Unix epoch).
///
/// Callers guarantee `node_count >= 1`; configuration validation enforces
/// this before the loop starts.
pub fn slot_for(now_ms: u64, node_count: u8) -> u8 {
    ((now_ms / SLOT_DURATION_MS) % u64::from(node_count)) as u8
}
