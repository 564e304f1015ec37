//! Cancellable timers that feed the server event loop.
//!
//! A timer is a spawned task that posts a [`ServerEvent`] into the loop's
//! channel. Dropping or cancelling the handle aborts the task, so an event
//! is never delivered after its owner has let go of the handle. Events that
//! were already queued before the abort are filtered by their consumers.

use crate::network::{EventSender, ServerEvent};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

#[derive(Debug)]
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    /// Delivers `event` once after `delay`.
    pub fn after(delay: Duration, events: EventSender, event: ServerEvent) -> Self {
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(event);
        });
        Self { task }
    }

    /// Delivers a fresh event every `period`, starting one period from now.
    pub fn every<F>(period: Duration, events: EventSender, make_event: F) -> Self
    where
        F: Fn() -> ServerEvent + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if events.send(make_event()).is_err() {
                    break;
                }
            }
        });
        Self { task }
    }

    /// Stops the timer. Calling this more than once is harmless.
    pub fn cancel(&self) {
        self.task.abort();
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
