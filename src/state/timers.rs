use std::{future::Future, time::Duration};

use tokio::{
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, sleep},
};

/// Pending delayed tasks of a room (phase timeouts, countdowns, tickers).
///
/// Handles are aborted on every phase transition and when the room is torn
/// down. Each task also carries the generation it was armed under, so a task
/// that already passed its await point when aborted still finds a stale
/// generation and does nothing.
#[derive(Debug, Default)]
pub struct PhaseTimers {
    handles: Vec<JoinHandle<()>>,
    countdown: Option<JoinHandle<()>>,
}

impl PhaseTimers {
    /// Run `task` once after `delay`.
    pub fn after<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.handles.push(tokio::spawn(async move {
            sleep(delay).await;
            task.await;
        }));
    }

    /// Call `tick` every `period`, starting one period from now, until it returns `false`.
    pub fn every<F, Fut>(&mut self, period: Duration, mut tick: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        self.handles.push(tokio::spawn(async move {
            let mut interval = interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if !tick().await {
                    break;
                }
            }
        }));
    }

    /// Run the lobby countdown `task` after `delay`, replacing any countdown already armed.
    pub fn arm_countdown<F>(&mut self, delay: Duration, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel_countdown();
        self.countdown = Some(tokio::spawn(async move {
            sleep(delay).await;
            task.await;
        }));
    }

    /// Whether a lobby countdown is still running.
    pub fn countdown_pending(&self) -> bool {
        self.countdown
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Abort the lobby countdown. Returns true if one was still running.
    pub fn cancel_countdown(&mut self) -> bool {
        match self.countdown.take() {
            Some(handle) => {
                let running = !handle.is_finished();
                handle.abort();
                running
            }
            None => false,
        }
    }

    /// Abort every pending task, the countdown included.
    pub fn cancel_all(&mut self) {
        for handle in self.handles.drain(..) {
            handle.abort();
        }
        self.cancel_countdown();
    }

    /// Number of tasks still running, the countdown included.
    pub fn pending(&self) -> usize {
        self.handles.iter().filter(|handle| !handle.is_finished()).count()
            + usize::from(self.countdown_pending())
    }
}

impl Drop for PhaseTimers {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
