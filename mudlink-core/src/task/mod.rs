use std::{collections::HashMap, future::Future, time::Duration};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Types
pub type TimerId = u64;

/// What a tracked task is for, so related ones can be cancelled together.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    KeepAlive,
    Settle,
    HardTimeout,
    Reconnect,
    Banner,
    Connect,
}

struct TrackedTimer {
    kind: TimerKind,
    handle: JoinHandle<()>,
}

/// Every timer and background attempt a session has scheduled.
///
/// Dropping the registry aborts everything still pending.
#[derive(Default)]
pub struct TimerRegistry {
    next_id: TimerId,
    timers: HashMap<TimerId, TrackedTimer>,
}

impl TimerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `fut` on the runtime and track it under `kind`.
    pub fn spawn<F>(&mut self, kind: TimerKind, fut: F) -> TimerId
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.prune();
        self.next_id += 1;
        let id = self.next_id;
        self.timers.insert(
            id,
            TrackedTimer {
                kind,
                handle: tokio::spawn(fut),
            },
        );
        id
    }

    /// Deliver `msg` on `tx` after `delay`, unless cancelled first.
    pub fn schedule<T>(
        &mut self,
        kind: TimerKind,
        delay: Duration,
        tx: mpsc::UnboundedSender<T>,
        msg: T,
    ) -> TimerId
    where
        T: Send + 'static,
    {
        self.spawn(kind, async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(msg);
        })
    }

    pub fn cancel(&mut self, id: TimerId) -> bool {
        match self.timers.remove(&id) {
            Some(timer) => {
                timer.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_kind(&mut self, kind: TimerKind) -> usize {
        let ids: Vec<TimerId> = self
            .timers
            .iter()
            .filter(|(_, t)| t.kind == kind)
            .map(|(id, _)| *id)
            .collect();
        for id in &ids {
            self.cancel(*id);
        }
        ids.len()
    }

    /// Abort every tracked task at once.
    pub fn cancel_all(&mut self) -> usize {
        let n = self.timers.len();
        for (_, timer) in self.timers.drain() {
            timer.handle.abort();
        }
        if n > 0 {
            tracing::debug!("cancelled {n} pending timers");
        }
        n
    }

    /// Number of tasks that have not finished yet.
    pub fn len(&mut self) -> usize {
        self.prune();
        self.timers.len()
    }

    pub fn is_empty(&mut self) -> bool {
        self.len() == 0
    }

    pub fn count(&mut self, kind: TimerKind) -> usize {
        self.prune();
        self.timers.values().filter(|t| t.kind == kind).count()
    }

    fn prune(&mut self) {
        self.timers.retain(|_, t| !t.handle.is_finished());
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scheduled_message_arrives() {
        let mut timers = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        timers.schedule(TimerKind::Settle, Duration::from_millis(10), tx, 42u32);
        assert_eq!(rx.recv().await, Some(42));
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let mut timers = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = timers.schedule(TimerKind::Reconnect, Duration::from_millis(30), tx, ());
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));

        let got = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        // Sender was dropped with the aborted task.
        assert!(matches!(got, Ok(None)));
    }

    #[tokio::test]
    async fn cancel_kind_leaves_others() {
        let mut timers = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        timers.schedule(TimerKind::KeepAlive, Duration::from_millis(20), tx.clone(), "ka");
        timers.schedule(TimerKind::KeepAlive, Duration::from_millis(20), tx.clone(), "ka");
        timers.schedule(TimerKind::Settle, Duration::from_millis(20), tx, "settle");

        assert_eq!(timers.cancel_kind(TimerKind::KeepAlive), 2);
        assert_eq!(timers.count(TimerKind::Settle), 1);
        assert_eq!(rx.recv().await, Some("settle"));
    }

    #[tokio::test]
    async fn cancel_all_clears_registry() {
        let mut timers = TimerRegistry::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        for kind in [TimerKind::Banner, TimerKind::HardTimeout, TimerKind::Reconnect] {
            timers.schedule(kind, Duration::from_millis(20), tx.clone(), kind);
        }
        drop(tx);
        assert_eq!(timers.cancel_all(), 3);
        assert!(timers.is_empty());
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn finished_tasks_are_pruned() {
        let mut timers = TimerRegistry::new();
        timers.spawn(TimerKind::Connect, async {});
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(timers.len(), 0);
    }
}
