//! Named, periodically firing timers.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Longest supported alarm period. Longer periods are capped to it.
pub const MAX_PERIOD: Duration = Duration::from_secs(365 * 24 * 60 * 60);
/// Shortest supported alarm period. Shorter periods are raised to it.
pub const MIN_PERIOD: Duration = Duration::from_millis(1);

/// A registry of named alarms running on the tokio runtime.
///
/// Each alarm invokes its callback once per period, starting one period after creation. If a
/// callback takes longer than the period, the missed ticks are skipped rather than caught up.
/// Dropping the registry cancels all alarms.
#[derive(Debug, Default)]
pub struct Alarms {
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl Alarms {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an alarm, replacing any existing alarm with the same name.
    ///
    /// The period is clamped to [MIN_PERIOD]..=[MAX_PERIOD]. Must be called from within a tokio
    /// runtime.
    pub fn create<F, Fut>(&self, name: &str, period: Duration, callback: F)
    where
        F: Fn() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let period = clamp_period(name, period);
        let start = Instant::now();
        let start = start.checked_add(period).unwrap_or(start);
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(start, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                interval.tick().await;
                callback().await;
            }
        });
        if let Some(previous) = self.tasks.lock().unwrap().insert(name.to_string(), task) {
            previous.abort();
        }
    }

    /// Cancels the named alarm. Returns whether it existed.
    pub fn clear(&self, name: &str) -> bool {
        match self.tasks.lock().unwrap().remove(name) {
            Some(task) => {
                task.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_scheduled(&self, name: &str) -> bool {
        self.tasks
            .lock()
            .unwrap()
            .get(name)
            .is_some_and(|task| !task.is_finished())
    }
}

fn clamp_period(name: &str, period: Duration) -> Duration {
    let clamped = period.clamp(MIN_PERIOD, MAX_PERIOD);
    if clamped != period {
        tracing::warn!(alarm = name, ?period, ?clamped, "alarm period out of range, clamped");
    }
    clamped
}

impl Drop for Alarms {
    fn drop(&mut self) {
        if let Ok(tasks) = self.tasks.get_mut() {
            for (_, task) in tasks.drain() {
                task.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_alarm(alarms: &Alarms, name: &str, period: Duration) -> Arc<AtomicUsize> {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        alarms.create(name, period, move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        count
    }

    async fn advance(duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_once_per_period_starting_after_one_period() {
        let alarms = Alarms::new();
        let count = counting_alarm(&alarms, "refresh", Duration::from_secs(60));
        assert!(alarms.is_scheduled("refresh"));

        advance(Duration::from_secs(59)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
        advance(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        advance(Duration::from_secs(120)).await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clear_stops_alarm() {
        let alarms = Alarms::new();
        let count = counting_alarm(&alarms, "refresh", Duration::from_secs(60));
        assert!(alarms.clear("refresh"));
        assert!(!alarms.clear("refresh"));
        assert!(!alarms.is_scheduled("refresh"));

        advance(Duration::from_secs(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_create_replaces_alarm_with_same_name() {
        let alarms = Alarms::new();
        let old = counting_alarm(&alarms, "refresh", Duration::from_secs(60));
        let new = counting_alarm(&alarms, "refresh", Duration::from_secs(600));

        advance(Duration::from_secs(601)).await;
        assert_eq!(old.load(Ordering::SeqCst), 0);
        assert_eq!(new.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_callback_skips_ticks() {
        let alarms = Alarms::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);
        alarms.create("slow", Duration::from_secs(10), move || {
            let counter = Arc::clone(&counter);
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_secs(25)).await;
            }
        });

        // Fires at 10s, runs until 35s, next tick at 40s.
        advance(Duration::from_secs(39)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        advance(Duration::from_secs(2)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_huge_period_is_capped() {
        let alarms = Alarms::new();
        let count = counting_alarm(&alarms, "refresh", Duration::MAX);

        advance(Duration::from_secs(1)).await;
        assert!(alarms.is_scheduled("refresh"));
        assert_eq!(count.load(Ordering::SeqCst), 0);

        advance(MAX_PERIOD).await;
        assert!(alarms.is_scheduled("refresh"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_period_is_raised() {
        let alarms = Alarms::new();
        let count = counting_alarm(&alarms, "refresh", Duration::ZERO);
        advance(Duration::from_millis(10)).await;
        assert!(alarms.is_scheduled("refresh"));
        assert!(count.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropping_registry_cancels_alarms() {
        let alarms = Alarms::new();
        let count = counting_alarm(&alarms, "refresh", Duration::from_secs(60));
        drop(alarms);
        advance(Duration::from_secs(300)).await;
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }
}
