use std::time::{SystemTime, UNIX_EPOCH};

/// Seconds since the Unix epoch as a float, the unit every lifecycle timestamp uses.
///
/// A clock set before the epoch reads as zero.
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_is_after_2020() {
        assert!(now_seconds() > 1_577_836_800.0);
    }
}
