//! Countdown and delayed-advance tasks. Both only post events; the machine
//! owns the remaining-seconds counter.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tracing::debug;

use crate::machine::GameEvent;

/// Handle to a spawned timer task. Aborted on `cancel` or drop.
pub struct CountdownTimer {
    pub epoch: u64,
    task: JoinHandle<()>,
}

impl CountdownTimer {
    /// Post `TimerTick { epoch }` once a second, `seconds` times. The first
    /// tick arrives one second after spawning.
    pub fn spawn<T, F>(epoch: u64, seconds: u32, tx: mpsc::Sender<T>, wrap: F) -> Self
    where
        T: Send + 'static,
        F: Fn(GameEvent) -> T + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let period = Duration::from_secs(1);
            let mut ticks = interval_at(Instant::now() + period, period);
            for _ in 0..seconds {
                ticks.tick().await;
                if tx.send(wrap(GameEvent::TimerTick { epoch })).await.is_err() {
                    return;
                }
            }
            debug!("timer {} done", epoch);
        });
        Self { epoch, task }
    }

    /// Post a single event after `delay`.
    pub fn schedule<T, F>(delay: Duration, event: GameEvent, tx: mpsc::Sender<T>, wrap: F) -> Self
    where
        T: Send + 'static,
        F: FnOnce(GameEvent) -> T + Send + 'static,
    {
        let epoch = match &event {
            GameEvent::TimerTick { epoch }
            | GameEvent::TimerExpired { epoch }
            | GameEvent::AdvanceRound { epoch } => *epoch,
            _ => 0,
        };
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(wrap(event)).await;
        });
        Self { epoch, task }
    }

    pub fn cancel(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for CountdownTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
