//! Completion events bridged from driver threads to the control thread

use std::time::Duration;

use bitflags::bitflags;
use parking_lot::{Condvar, Mutex};

bitflags! {
    /// Event bits a component callback can raise.
    ///
    /// Each bit means "the most recent command of this kind completed"; repeated
    /// completions of the same kind collapse into one pending bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EventFlags: u32 {
        const ERROR = 0x001;
        const PORT_ENABLE = 0x002;
        const PORT_DISABLE = 0x004;
        const STATE_SET = 0x008;
        const PARAM_OR_CONFIG_CHANGED = 0x010;
        const FILL_BUFFER_DONE = 0x080;
        const EMPTY_BUFFER_DONE = 0x100;
    }
}

/// Per-component set of pending event flags.
///
/// `signal` may be called from any driver thread; `await_any` is meant for the
/// single control thread. ERROR is always part of the wait set.
#[derive(Debug)]
pub struct EventChannel {
    name: &'static str,
    pending: Mutex<EventFlags>,
    cond: Condvar,
}

impl EventChannel {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            pending: Mutex::new(EventFlags::empty()),
            cond: Condvar::new(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// OR `events` into the pending set and wake waiters.
    pub fn signal(&self, events: EventFlags) {
        let mut pending = self.pending.lock();
        *pending |= events;
        self.cond.notify_all();
    }

    /// Block until any bit of `events | ERROR` is pending, consume the matched
    /// bits and return them.
    pub fn await_any(&self, events: EventFlags) -> EventFlags {
        let wanted = events | EventFlags::ERROR;
        let mut pending = self.pending.lock();
        loop {
            let matched = *pending & wanted;
            if !matched.is_empty() {
                pending.remove(matched);
                return matched;
            }
            self.cond.wait(&mut pending);
        }
    }

    /// Bounded variant of [`await_any`](Self::await_any). Returns `None` when
    /// nothing matched before `timeout` elapsed; nothing is consumed then.
    pub fn await_any_timeout(&self, events: EventFlags, timeout: Duration) -> Option<EventFlags> {
        let wanted = events | EventFlags::ERROR;
        let mut pending = self.pending.lock();
        loop {
            let matched = *pending & wanted;
            if !matched.is_empty() {
                pending.remove(matched);
                return Some(matched);
            }
            if self.cond.wait_for(&mut pending, timeout).timed_out() {
                let matched = *pending & wanted;
                if matched.is_empty() {
                    return None;
                }
                pending.remove(matched);
                return Some(matched);
            }
        }
    }

    /// Snapshot of the pending set, without consuming anything.
    pub fn pending(&self) -> EventFlags {
        *self.pending.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn consumes_only_matched_bits() {
        let channel = EventChannel::new("test");
        channel.signal(EventFlags::FILL_BUFFER_DONE | EventFlags::EMPTY_BUFFER_DONE);

        let got = channel.await_any(EventFlags::EMPTY_BUFFER_DONE);
        assert_eq!(got, EventFlags::EMPTY_BUFFER_DONE);
        assert_eq!(channel.pending(), EventFlags::FILL_BUFFER_DONE);
    }

    #[test]
    fn error_always_wakes_the_waiter() {
        let channel = EventChannel::new("test");
        channel.signal(EventFlags::ERROR);

        let got = channel.await_any(EventFlags::STATE_SET);
        assert!(got.contains(EventFlags::ERROR));
        assert!(channel.pending().is_empty());
    }

    #[test]
    fn repeated_signals_collapse() {
        let channel = EventChannel::new("test");
        channel.signal(EventFlags::STATE_SET);
        channel.signal(EventFlags::STATE_SET);

        assert_eq!(channel.await_any(EventFlags::STATE_SET), EventFlags::STATE_SET);
        assert_eq!(
            channel.await_any_timeout(EventFlags::STATE_SET, Duration::from_millis(10)),
            None
        );
    }

    #[test]
    fn wakes_on_signal_from_another_thread() {
        let channel = Arc::new(EventChannel::new("test"));
        let remote = channel.clone();
        let signaller = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.signal(EventFlags::PORT_DISABLE);
        });

        let got = channel.await_any(EventFlags::PORT_DISABLE | EventFlags::STATE_SET);
        assert_eq!(got, EventFlags::PORT_DISABLE);
        signaller.join().unwrap();
    }

    #[test]
    fn every_flag_has_a_producer() {
        let raised = [
            EventFlags::ERROR,
            EventFlags::PORT_ENABLE,
            EventFlags::PORT_DISABLE,
            EventFlags::STATE_SET,
            EventFlags::PARAM_OR_CONFIG_CHANGED,
            EventFlags::FILL_BUFFER_DONE,
            EventFlags::EMPTY_BUFFER_DONE,
        ]
        .into_iter()
        .fold(EventFlags::empty(), |acc, flag| acc | flag);
        assert_eq!(EventFlags::all(), raised);
    }

    #[test]
    fn unrelated_bits_do_not_wake() {
        let channel = EventChannel::new("test");
        channel.signal(EventFlags::PORT_ENABLE);

        assert_eq!(
            channel.await_any_timeout(EventFlags::STATE_SET, Duration::from_millis(10)),
            None
        );
        assert_eq!(channel.pending(), EventFlags::PORT_ENABLE);
    }
}
