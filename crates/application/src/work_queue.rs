use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use tenure_core::{AppError, AppResult};
use tokio::sync::{Mutex, Semaphore};

/// Serializes lifecycle work per subject and bounds total concurrency.
///
/// Work for one subject runs strictly one at a time, in lock acquisition
/// order. Work for different subjects runs concurrently up to the configured
/// capacity.
#[derive(Clone)]
pub struct SubjectWorkQueue {
    inner: Arc<WorkQueueInner>,
}

type SubjectLocks = HashMap<String, Arc<Mutex<()>>>;

struct WorkQueueInner {
    permits: Semaphore,
    subjects: StdMutex<SubjectLocks>,
}

impl WorkQueueInner {
    fn subjects(&self) -> AppResult<MutexGuard<'_, SubjectLocks>> {
        self.subjects
            .lock()
            .map_err(|error| AppError::Internal(format!("work queue map is poisoned: {error}")))
    }
}

/// Registration of one operation for a subject.
///
/// Dropping it removes the subject's entry once no other operation holds or
/// waits for it, including when the operation is cancelled mid-await.
struct SubjectEntry<'a> {
    inner: &'a WorkQueueInner,
    subject_id: &'a str,
    lock: Arc<Mutex<()>>,
}

impl<'a> SubjectEntry<'a> {
    fn register(inner: &'a WorkQueueInner, subject_id: &'a str) -> AppResult<Self> {
        let lock = Arc::clone(inner.subjects()?.entry(subject_id.to_owned()).or_default());
        Ok(Self {
            inner,
            subject_id,
            lock,
        })
    }
}

impl Drop for SubjectEntry<'_> {
    fn drop(&mut self) {
        let Ok(mut subjects) = self.inner.subjects() else {
            return;
        };
        // One reference in the map plus ours means nobody else is waiting.
        if subjects
            .get(self.subject_id)
            .is_some_and(|existing| Arc::strong_count(existing) == 2)
        {
            subjects.remove(self.subject_id);
        }
    }
}

impl SubjectWorkQueue {
    /// Creates a queue allowing `capacity` concurrent operations.
    pub fn new(capacity: usize) -> AppResult<Self> {
        if capacity == 0 {
            return Err(AppError::Validation(
                "work queue capacity must be greater than zero".to_owned(),
            ));
        }

        Ok(Self {
            inner: Arc::new(WorkQueueInner {
                permits: Semaphore::new(capacity),
                subjects: StdMutex::new(HashMap::new()),
            }),
        })
    }

    /// Runs `work` once every earlier operation for `subject_id` finished.
    pub async fn run<F, T>(&self, subject_id: &str, work: F) -> AppResult<T>
    where
        F: Future<Output = AppResult<T>>,
    {
        let entry = SubjectEntry::register(&self.inner, subject_id)?;
        let _subject_guard = entry.lock.lock().await;
        let _permit = self
            .inner
            .permits
            .acquire()
            .await
            .map_err(|error| AppError::Internal(format!("work queue is closed: {error}")))?;

        work.await
    }

    /// Returns how many subjects currently have queued or running work.
    #[must_use]
    pub fn tracked_subjects(&self) -> usize {
        self.inner.subjects().map_or(0, |subjects| subjects.len())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use tenure_core::AppResult;

    use super::SubjectWorkQueue;

    #[test]
    fn zero_capacity_is_rejected() {
        assert!(SubjectWorkQueue::new(0).is_err());
    }

    #[tokio::test]
    async fn same_subject_work_never_overlaps() {
        let Ok(queue) = SubjectWorkQueue::new(8) else {
            panic!("queue should be created");
        };
        let running = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let queue = queue.clone();
            let running = Arc::clone(&running);
            let overlaps = Arc::clone(&overlaps);
            handles.push(tokio::spawn(async move {
                queue
                    .run("100", async {
                        if running.fetch_add(1, Ordering::SeqCst) > 0 {
                            overlaps.fetch_add(1, Ordering::SeqCst);
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        AppResult::Ok(())
                    })
                    .await
            }));
        }

        for handle in handles {
            assert!(matches!(handle.await, Ok(Ok(()))));
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert_eq!(queue.tracked_subjects(), 0);
    }

    #[tokio::test]
    async fn errors_are_returned_to_the_caller() {
        let Ok(queue) = SubjectWorkQueue::new(1) else {
            panic!("queue should be created");
        };

        let result: AppResult<()> = queue
            .run("100", async {
                Err(tenure_core::AppError::Internal("boom".to_owned()))
            })
            .await;

        assert!(result.is_err());
        assert_eq!(queue.tracked_subjects(), 0);
    }

    #[tokio::test]
    async fn cancelled_work_releases_its_subject() {
        let Ok(queue) = SubjectWorkQueue::new(2) else {
            panic!("queue should be created");
        };

        let cancelled = tokio::time::timeout(
            Duration::from_millis(10),
            queue.run("100", std::future::pending::<AppResult<()>>()),
        )
        .await;
        assert!(cancelled.is_err());
        assert_eq!(queue.tracked_subjects(), 0);

        let next = queue.run("100", async { AppResult::Ok(7) }).await;
        assert!(matches!(next, Ok(7)));
        assert_eq!(queue.tracked_subjects(), 0);
    }
}
