//! Cancellable one-shot timers

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(pub u64);

/// Schedules delayed wake-ups that are delivered back as [`TimerId`]s
pub trait Scheduler: Send {
    fn schedule(&mut self, delay: Duration) -> TimerId;
    fn cancel(&mut self, timer: TimerId);
}

/// Tokio-backed scheduler; expired timer ids arrive on the channel returned by [`TokioScheduler::new`]
pub struct TokioScheduler {
    next_id: u64,
    fired: mpsc::UnboundedSender<TimerId>,
    pending: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioScheduler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TimerId>) {
        let (fired, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            next_id: 0,
            fired,
            pending: HashMap::new(),
        };
        (scheduler, rx)
    }

    pub fn pending(&self) -> usize {
        self.pending.values().filter(|h| !h.is_finished()).count()
    }
}

impl Scheduler for TokioScheduler {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.pending.retain(|_, handle| !handle.is_finished());
        self.next_id += 1;
        let timer = TimerId(self.next_id);
        let fired = self.fired.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = fired.send(timer);
        });
        self.pending.insert(timer, handle);
        timer
    }

    fn cancel(&mut self, timer: TimerId) {
        if let Some(handle) = self.pending.remove(&timer) {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_timer_fires_after_delay() {
        let (mut scheduler, mut fired) = TokioScheduler::new();
        let timer = scheduler.schedule(Duration::from_millis(500));
        assert_eq!(fired.recv().await, Some(timer));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_timer_never_fires() {
        let (mut scheduler, mut fired) = TokioScheduler::new();
        let cancelled = scheduler.schedule(Duration::from_millis(100));
        let kept = scheduler.schedule(Duration::from_millis(200));
        scheduler.cancel(cancelled);
        assert_eq!(fired.recv().await, Some(kept));
    }
}
