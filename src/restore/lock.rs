use std::collections::HashSet;
use std::sync::Mutex;

use once_cell::sync::Lazy;

static IN_FLIGHT: Lazy<Mutex<HashSet<String>>> = Lazy::new(|| Mutex::new(HashSet::new()));

fn registry() -> std::sync::MutexGuard<'static, HashSet<String>> {
    IN_FLIGHT.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Process-wide claim on a trip ID for the duration of one restore.
/// Released on drop.
#[derive(Debug)]
pub struct TripLock {
    trip_id: String,
}

impl TripLock {
    /// `None` when another restore of the same trip is in flight.
    pub fn try_acquire(trip_id: &str) -> Option<TripLock> {
        if registry().insert(trip_id.to_string()) {
            Some(TripLock {
                trip_id: trip_id.to_string(),
            })
        } else {
            None
        }
    }

    pub fn trip_id(&self) -> &str {
        &self.trip_id
    }
}

impl Drop for TripLock {
    fn drop(&mut self) {
        registry().remove(&self.trip_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_claim_fails_until_release() {
        let first = TripLock::try_acquire("lock-test-trip").unwrap();
        assert_eq!(first.trip_id(), "lock-test-trip");
        assert!(TripLock::try_acquire("lock-test-trip").is_none());
        assert!(TripLock::try_acquire("lock-test-other").is_some());
        drop(first);
        assert!(TripLock::try_acquire("lock-test-trip").is_some());
    }
}
