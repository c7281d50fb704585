use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Datelike, LocalResult, NaiveTime, TimeZone, Utc, Weekday};
use chrono_tz::Tz;
use tokio::task::JoinHandle;

/// Identity of a timed job. One keyspace for every job kind; scheduling
/// under an occupied key replaces the old job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKey {
    /// Weekly Mon–Sat reminder at a fixed local time.
    Reminder { user_id: i64 },
    /// One-shot retraction of a message's inline keyboard.
    Expire { chat_id: i64, message_id: i32 },
    /// One-shot silence timeout for a pending conversation flow.
    FlowTimeout { user_id: i64 },
}

struct JobSlot {
    generation: u64,
    handle: JoinHandle<()>,
}

struct Inner {
    jobs: Mutex<HashMap<JobKey, JobSlot>>,
    next_generation: AtomicU64,
}

/// In-memory job table. Jobs live only for the process lifetime; recurring
/// reminders are re-derived from persisted settings at startup.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<Inner>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Run `job` once after `delay`. An existing job under `key` is replaced
    /// and its countdown discarded.
    pub fn schedule_once<F>(&self, key: JobKey, delay: Duration, job: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);

        // Hold the table lock across spawn + insert so the new task cannot
        // observe the table before its own slot exists.
        let mut jobs = self.inner.jobs.lock().expect("scheduler job table");
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Fire only while this generation still owns the key, and remove
            // the slot in the same critical section. A cancel that won the
            // race makes this a no-op even though the timer already elapsed.
            {
                let mut jobs = inner.jobs.lock().expect("scheduler job table");
                if jobs.get(&key).map(|slot| slot.generation) != Some(generation) {
                    return;
                }
                jobs.remove(&key);
            }
            job.await;
        });
        if let Some(old) = jobs.insert(key, JobSlot { generation, handle }) {
            old.handle.abort();
        }
    }

    /// Fire `make_job` every Monday–Saturday at `minutes` past local midnight
    /// in `tz`. `minutes <= 0` disables: any existing job under `key` is
    /// removed and no new one is created.
    pub fn schedule_recurring<F, Fut>(&self, key: JobKey, minutes: i32, tz: Tz, mut make_job: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.cancel(key);
        if minutes <= 0 {
            return;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::clone(&self.inner);

        let mut jobs = self.inner.jobs.lock().expect("scheduler job table");
        let handle = tokio::spawn(async move {
            loop {
                let next = next_occurrence(Utc::now(), minutes, tz);
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                {
                    let jobs = inner.jobs.lock().expect("scheduler job table");
                    if jobs.get(&key).map(|slot| slot.generation) != Some(generation) {
                        return;
                    }
                }
                // The callback runs on its own task so its I/O cannot stall
                // the next occurrence of this or any other job.
                tokio::spawn(make_job());
            }
        });
        if let Some(old) = jobs.insert(key, JobSlot { generation, handle }) {
            old.handle.abort();
        }
    }

    /// Remove the job under `key`, if any. Canceling an absent job is a
    /// success; a one-shot already past its timer but not yet fired will not
    /// fire after this returns.
    pub fn cancel(&self, key: JobKey) {
        let mut jobs = self.inner.jobs.lock().expect("scheduler job table");
        if let Some(slot) = jobs.remove(&key) {
            slot.handle.abort();
        }
    }

    pub fn pending(&self, key: JobKey) -> bool {
        self.inner
            .jobs
            .lock()
            .expect("scheduler job table")
            .contains_key(&key)
    }

    pub fn job_count(&self) -> usize {
        self.inner.jobs.lock().expect("scheduler job table").len()
    }

    /// Abort and drop every job. Used on shutdown.
    pub fn shutdown(&self) {
        let mut jobs = self.inner.jobs.lock().expect("scheduler job table");
        for (_, slot) in jobs.drain() {
            slot.handle.abort();
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Next Mon–Sat instant at `minutes` past local midnight in `tz`, strictly
/// after `now_utc`. Skipped or ambiguous local times (DST transitions)
/// resolve to the next valid occurrence.
pub fn next_occurrence(now_utc: DateTime<Utc>, minutes: i32, tz: Tz) -> DateTime<Utc> {
    let local_now = now_utc.with_timezone(&tz);
    let time = NaiveTime::from_num_seconds_from_midnight_opt(minutes.max(0) as u32 * 60, 0)
        .unwrap_or(NaiveTime::MIN);
    for day in 0..=7 {
        let date = local_now.date_naive() + chrono::Duration::days(day);
        if date.weekday() == Weekday::Sun {
            continue;
        }
        let candidate = match tz.from_local_datetime(&date.and_time(time)) {
            LocalResult::Single(dt) => dt,
            LocalResult::Ambiguous(dt, _) => dt,
            LocalResult::None => continue,
        };
        if candidate > local_now {
            return candidate.with_timezone(&Utc);
        }
    }
    now_utc + chrono::Duration::days(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn warsaw() -> Tz {
        "Europe/Warsaw".parse().unwrap()
    }

    fn local(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        warsaw()
            .with_ymd_and_hms(y, m, d, h, min, 0)
            .single()
            .unwrap()
            .with_timezone(&Utc)
    }

    fn key() -> JobKey {
        JobKey::Expire {
            chat_id: 10,
            message_id: 20,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn one_shot_fires_once_and_leaves_the_table() {
        let sched = Scheduler::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        sched.schedule_once(key(), Duration::from_secs(60), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        assert!(sched.pending(key()));

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!sched.pending(key()));

        tokio::time::sleep(Duration::from_secs(120)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rescheduling_resets_the_countdown() {
        let sched = Scheduler::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let f = Arc::clone(&first);
        sched.schedule_once(key(), Duration::from_secs(60), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });

        tokio::time::sleep(Duration::from_secs(30)).await;
        let s = Arc::clone(&second);
        sched.schedule_once(key(), Duration::from_secs(60), async move {
            s.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(sched.job_count(), 1);

        // 70s after the first call: only the replacement deadline counts.
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_is_idempotent_and_suppresses_firing() {
        let sched = Scheduler::new();
        sched.cancel(key());

        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        sched.schedule_once(key(), Duration::from_secs(60), async move {
            f.fetch_add(1, Ordering::SeqCst);
        });
        sched.cancel(key());
        sched.cancel(key());

        tokio::time::sleep(Duration::from_secs(180)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(!sched.pending(key()));
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_zero_minutes_disables() {
        let sched = Scheduler::new();
        let k = JobKey::Reminder { user_id: 7 };
        sched.schedule_recurring(k, 540, warsaw(), || async {});
        assert!(sched.pending(k));

        sched.schedule_recurring(k, 0, warsaw(), || async {});
        assert!(!sched.pending(k));
        assert_eq!(sched.job_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn recurring_reschedule_keeps_a_single_job() {
        let sched = Scheduler::new();
        let k = JobKey::Reminder { user_id: 7 };
        sched.schedule_recurring(k, 540, warsaw(), || async {});
        sched.schedule_recurring(k, 600, warsaw(), || async {});
        assert_eq!(sched.job_count(), 1);
        sched.shutdown();
        assert_eq!(sched.job_count(), 0);
    }

    #[test]
    fn next_occurrence_same_day_when_time_ahead() {
        // Monday 2025-01-06, 08:00 local; reminder at 09:00.
        let now = local(2025, 1, 6, 8, 0);
        let next = next_occurrence(now, 540, warsaw());
        assert_eq!(next, local(2025, 1, 6, 9, 0));
    }

    #[test]
    fn next_occurrence_rolls_to_next_day_when_time_passed() {
        let now = local(2025, 1, 6, 10, 0);
        let next = next_occurrence(now, 540, warsaw());
        assert_eq!(next, local(2025, 1, 7, 9, 0));
    }

    #[test]
    fn next_occurrence_skips_sunday() {
        // Saturday 2025-01-04 at 10:00, reminder 09:00 -> Monday 09:00.
        let now = local(2025, 1, 4, 10, 0);
        assert_eq!(next_occurrence(now, 540, warsaw()), local(2025, 1, 6, 9, 0));
        // Sunday itself is never a candidate.
        let sunday = local(2025, 1, 5, 7, 0);
        assert_eq!(
            next_occurrence(sunday, 540, warsaw()),
            local(2025, 1, 6, 9, 0)
        );
    }

    #[test]
    fn next_occurrence_is_strictly_in_the_future() {
        let at_fire_time = local(2025, 1, 6, 9, 0);
        let next = next_occurrence(at_fire_time, 540, warsaw());
        assert_eq!(next, local(2025, 1, 7, 9, 0));
    }
}
