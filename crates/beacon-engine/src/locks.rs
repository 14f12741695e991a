//! Per-student write serialization

use beacon_domain::StudentId;
use dashmap::DashMap;
use std::sync::{Arc, Mutex};

/// Lock table keyed by student
///
/// Writes for one student run one at a time; different students proceed
/// in parallel. Entries are created on first use and kept.
#[derive(Debug, Default)]
pub struct StudentLocks {
    locks: DashMap<StudentId, Arc<Mutex<()>>>,
}

impl StudentLocks {
    /// Create an empty lock table
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` while holding the student's lock
    pub fn with<R>(&self, student_id: &StudentId, f: impl FnOnce() -> R) -> R {
        // Clone the mutex out so the map shard is not held while `f` runs
        let lock = Arc::clone(
            self.locks
                .entry(student_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        );
        let _guard = lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f()
    }

    /// Number of students that have taken a lock
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// Whether no lock was ever taken
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_same_student_is_serialized() {
        let locks = StudentLocks::new();
        let student = StudentId::new("S-1").unwrap();
        let inside = AtomicUsize::new(0);
        let max_inside = AtomicUsize::new(0);

        thread::scope(|s| {
            for _ in 0..8 {
                s.spawn(|| {
                    locks.with(&student, || {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        thread::sleep(Duration::from_millis(2));
                        inside.fetch_sub(1, Ordering::SeqCst);
                    })
                });
            }
        });

        assert_eq!(max_inside.load(Ordering::SeqCst), 1);
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_returns_closure_result() {
        let locks = StudentLocks::new();
        let student = StudentId::new("S-2").unwrap();
        assert_eq!(locks.with(&student, || 41 + 1), 42);
        assert!(!locks.is_empty());
    }
}
