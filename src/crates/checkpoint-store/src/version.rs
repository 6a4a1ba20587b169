//! Channel version generation

use crate::checkpoint::ChannelVersion;
use crate::error::{CheckpointError, Result};
use rand::Rng;

/// Exclusive upper bound of the random tie-break (16 decimal digits)
const TIE_BREAK_BOUND: u64 = 10_000_000_000_000_000;

/// Produce the version that follows `current`.
///
/// The integer prefix of `current` (0 when absent) is incremented and zero-padded
/// to 32 digits, then a random 16-digit tie-break is appended so two writers
/// versioning the same channel from the same `current` get distinct versions that
/// still order by prefix. A prefix that is not an integer is an error.
pub fn next_version(current: Option<&ChannelVersion>) -> Result<ChannelVersion> {
    let current_v = match current {
        None => 0,
        Some(version) => version.integer_prefix()?,
    };
    let next_v = current_v
        .checked_add(1)
        .ok_or_else(|| CheckpointError::InvalidVersion(current_v.to_string()))?;
    let next_h = rand::thread_rng().gen_range(0..TIE_BREAK_BOUND);

    Ok(ChannelVersion::String(format!("{:032}.{:016}", next_v, next_h)))
}
