//! Cancellable polling sessions.
//!
//! Each submission runs as one spawned task tagged with a [`SessionToken`].
//! Dropping or cancelling the [`ScheduledSession`] aborts the task, which also
//! drops its [`PollTimer`], so a superseded session can neither tick again nor
//! publish late results.

use std::{fmt, future::Future, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, Interval, MissedTickBehavior},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionToken(u64);

impl SessionToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Hands out strictly increasing tokens; the latest one is the only live session.
#[derive(Debug, Default)]
pub struct SessionCounter {
    last: u64,
}

impl SessionCounter {
    pub fn next(&mut self) -> SessionToken {
        self.last += 1;
        SessionToken(self.last)
    }

    pub fn current(&self) -> SessionToken {
        SessionToken(self.last)
    }
}

pub struct ScheduledSession {
    token: SessionToken,
    handle: JoinHandle<()>,
}

impl ScheduledSession {
    /// Spawns `task` on the ambient tokio runtime.
    pub fn spawn<F>(token: SessionToken, task: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self {
            token,
            handle: tokio::spawn(task),
        }
    }

    pub fn token(&self) -> SessionToken {
        self.token
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for ScheduledSession {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

impl fmt::Debug for ScheduledSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduledSession")
            .field("token", &self.token)
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}

/// Fixed-period timer; the first tick fires one full period after start.
pub struct PollTimer {
    interval: Interval,
}

impl PollTimer {
    pub fn start(period: Duration) -> Self {
        let period = period.max(Duration::from_millis(1));
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self { interval }
    }

    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    pub fn stop(self) {}
}
