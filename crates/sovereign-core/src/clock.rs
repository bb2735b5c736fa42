//! Time and identity sources.
//!
//! Both are traits so tests and simulations can pin them: `ManualClock` for
//! deterministic timestamps, `ScriptedEventIds` to force identifier
//! collisions between nodes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use sovereign_contracts::event::EventId;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    micros: AtomicI64,
}

impl ManualClock {
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        Self {
            micros: AtomicI64::new(start.timestamp_micros()),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        self.micros.store(at.timestamp_micros(), Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        let step = by.num_microseconds().unwrap_or(i64::MAX);
        self.micros.fetch_add(step, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_micros(self.micros.load(Ordering::SeqCst))
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

pub trait EventIdSource: Send + Sync {
    fn next_id(&self) -> EventId;
}

/// Random UUIDv4 identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomEventIds;

impl EventIdSource for RandomEventIds {
    fn next_id(&self) -> EventId {
        EventId::new()
    }
}

/// Hands out a fixed queue of identifiers, then falls back to random ones.
#[derive(Debug, Default)]
pub struct ScriptedEventIds {
    queue: Mutex<VecDeque<EventId>>,
}

impl ScriptedEventIds {
    pub fn new<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            queue: Mutex::new(ids.into_iter().map(|s| EventId(s.into())).collect()),
        }
    }
}

impl EventIdSource for ScriptedEventIds {
    fn next_id(&self) -> EventId {
        match self.queue.lock() {
            Ok(mut queue) => queue.pop_front().unwrap_or_default(),
            Err(_) => EventId::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn manual_clock_only_moves_when_advanced() {
        let start = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let clock = ManualClock::starting_at(start);
        assert_eq!(clock.now(), start);

        clock.advance(Duration::seconds(3));
        assert_eq!(clock.now(), start + Duration::seconds(3));
    }

    #[test]
    fn scripted_ids_drain_then_fall_back() {
        let ids = ScriptedEventIds::new(["evt-a", "evt-b"]);
        assert_eq!(ids.next_id().as_str(), "evt-a");
        assert_eq!(ids.next_id().as_str(), "evt-b");
        assert_ne!(ids.next_id().as_str(), "evt-b");
    }
}
