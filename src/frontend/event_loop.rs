use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::Result;
use crate::types::OverpassResponse;

/// Things that can happen to a session, in the order the loop hands them out.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// Start a round if none is active.
    ScheduleRound,
    /// The pacing delay of the compiled round elapsed; send it.
    Timeout,
    /// The transport answered.
    Deliver(Result<OverpassResponse>),
}

/// Deterministic timer queue on a virtual clock.
///
/// Events due at the same instant come out in the order they were
/// scheduled. With `real_time` the loop sleeps until an event is due,
/// otherwise the clock simply jumps forward.
#[derive(Debug, Default)]
pub struct EventLoop {
    now: Duration,
    next_seq: u64,
    queue: BTreeMap<(Duration, u64), Event>,
    real_time: bool,
}

impl EventLoop {
    pub fn new(real_time: bool) -> Self {
        Self {
            real_time,
            ..Default::default()
        }
    }

    pub fn now(&self) -> Duration {
        self.now
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn schedule(&mut self, delay: Duration, event: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.insert((self.now + delay, seq), event);
    }

    /// Removes the earliest event and advances the clock to its due time.
    pub fn pop(&mut self) -> Option<Event> {
        let ((due, _), event) = self.queue.pop_first()?;
        if due > self.now {
            if self.real_time {
                std::thread::sleep(due - self.now);
            }
            self.now = due;
        }
        Some(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn orders_by_due_time_then_submission() {
        let mut events = EventLoop::new(false);
        events.schedule(Duration::from_millis(10), Event::Timeout);
        events.schedule(Duration::ZERO, Event::ScheduleRound);
        events.schedule(Duration::ZERO, Event::Deliver(Ok(OverpassResponse::default())));

        assert_eq!(events.pop(), Some(Event::ScheduleRound));
        assert!(matches!(events.pop(), Some(Event::Deliver(_))));
        assert_eq!(events.now(), Duration::ZERO);
        assert_eq!(events.pop(), Some(Event::Timeout));
        assert_eq!(events.now(), Duration::from_millis(10));
        assert_eq!(events.pop(), None);
    }
}
