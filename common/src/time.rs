// Wall-clock helper. SystemTime is non deterministic, so this feeds
// admission control (future block drift) and expiry bookkeeping only;
// consensus decisions work from block timestamps exclusively.

use std::time::{SystemTime, UNIX_EPOCH};

pub type TimestampSeconds = u64;

// Seconds since the unix epoch. A clock set before the epoch reads
// as zero rather than aborting the node.
pub fn get_current_time_in_seconds() -> TimestampSeconds {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GENESIS_TIMESTAMP;

    #[test]
    fn test_clock_is_past_genesis() {
        assert!(get_current_time_in_seconds() > GENESIS_TIMESTAMP);
    }
}
