//! Clock available to code running inside an actor turn
//!
//! The scheduler installs its clock in a thread-local for the duration of
//! every turn. Outside a turn [`ActorClock::current`] fails with
//! [`Error::NotInActor`].

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;
use tidelog_core::{Clock, Error, Result};

thread_local! {
    static CURRENT: RefCell<Option<Arc<dyn Clock>>> = const { RefCell::new(None) };
}

/// Handle to the running actor's clock
#[derive(Clone)]
pub struct ActorClock {
    inner: Arc<dyn Clock>,
}

impl ActorClock {
    /// Clock of the actor running on this thread
    pub fn current() -> Result<ActorClock> {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .map(|inner| ActorClock {
                    inner: Arc::clone(inner),
                })
                .ok_or(Error::NotInActor)
        })
    }

    /// Whether this thread is inside an actor turn
    pub fn in_actor() -> bool {
        CURRENT.with(|current| current.borrow().is_some())
    }

    pub(crate) fn install(clock: Arc<dyn Clock>) -> ClockGuard {
        let previous = CURRENT.with(|current| current.borrow_mut().replace(clock));
        ClockGuard { previous }
    }
}

impl Clock for ActorClock {
    fn now_nanos(&self) -> u64 {
        self.inner.now_nanos()
    }
}

impl fmt::Debug for ActorClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActorClock")
            .field("now_nanos", &self.inner.now_nanos())
            .finish()
    }
}

/// Restores the previously installed clock on drop
pub(crate) struct ClockGuard {
    previous: Option<Arc<dyn Clock>>,
}

impl Drop for ClockGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|current| *current.borrow_mut() = previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tidelog_core::ManualClock;

    #[test]
    fn test_outside_turn_is_error() {
        assert!(matches!(ActorClock::current(), Err(Error::NotInActor)));
        assert!(!ActorClock::in_actor());
    }

    #[test]
    fn test_installed_clock_is_visible() {
        let manual = Arc::new(ManualClock::new());
        manual.advance(Duration::from_nanos(42));
        {
            let _guard = ActorClock::install(manual.clone());
            let clock = ActorClock::current().unwrap();
            assert_eq!(clock.now_nanos(), 42);
            manual.advance(Duration::from_nanos(8));
            assert_eq!(clock.now_nanos(), 50);
        }
        assert!(ActorClock::current().is_err());
    }

    #[test]
    fn test_nested_install_restores_outer() {
        let outer = Arc::new(ManualClock::new());
        let inner = Arc::new(ManualClock::new());
        inner.advance(Duration::from_nanos(7));

        let _outer_guard = ActorClock::install(outer);
        {
            let _inner_guard = ActorClock::install(inner);
            assert_eq!(ActorClock::current().unwrap().now_nanos(), 7);
        }
        assert_eq!(ActorClock::current().unwrap().now_nanos(), 0);
    }
}
