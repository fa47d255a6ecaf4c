//! RAII guard for a request's background drive.
//!
//! A drive (generation, upload wait or tracker push) that panics or is
//! aborted would otherwise leave its request, or one of its formats' sync
//! state, unsettled forever. The guard runs an abandon hook on drop unless
//! the drive marked itself completed.

use tracing::{debug, warn};
use uuid::Uuid;

type AbandonHook = Box<dyn FnOnce(Uuid) + Send>;

/// RAII guard for one generation, upload-wait or tracker-push drive.
///
/// # Example
///
/// ```ignore
/// let mut guard = DriveGuard::new(request_id, move |id| lifecycle.spawn_abandon(id));
/// lifecycle.drive(&slot, cancel).await;
/// guard.mark_completed(); // If not reached, Drop runs the hook
/// ```
pub struct DriveGuard {
    request_id: Uuid,
    on_abandon: Option<AbandonHook>,
    completed: bool,
}

impl DriveGuard {
    pub fn new(request_id: Uuid, on_abandon: impl FnOnce(Uuid) + Send + 'static) -> Self {
        debug!(request_id = %request_id, "Drive guard created");

        Self {
            request_id,
            on_abandon: Some(Box::new(on_abandon)),
            completed: false,
        }
    }

    pub fn mark_completed(&mut self) {
        self.completed = true;
        self.on_abandon = None;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

impl Drop for DriveGuard {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        warn!(
            request_id = %self.request_id,
            "Drive ended without settling its request"
        );

        if let Some(hook) = self.on_abandon.take() {
            hook(self.request_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting_guard(counter: &Arc<AtomicUsize>) -> DriveGuard {
        let counter = Arc::clone(counter);
        DriveGuard::new(Uuid::new_v4(), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_guard_initial_state() {
        let guard = DriveGuard::new(Uuid::new_v4(), |_| {});
        assert!(!guard.is_completed());
    }

    #[test]
    fn test_completed_guard_does_not_abandon() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut guard = counting_guard(&counter);

        guard.mark_completed();
        drop(guard);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_dropped_guard_abandons_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        drop(counting_guard(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_hook_receives_request_id() {
        let request_id = Uuid::new_v4();
        let seen = Arc::new(std::sync::Mutex::new(None));
        let sink = Arc::clone(&seen);

        let guard = DriveGuard::new(request_id, move |id| {
            *sink.lock().unwrap() = Some(id);
        });
        assert_eq!(guard.request_id(), request_id);
        drop(guard);

        assert_eq!(*seen.lock().unwrap(), Some(request_id));
    }

    #[test]
    fn test_guard_runs_during_panic_unwind() {
        let counter = Arc::new(AtomicUsize::new(0));
        let inner = Arc::clone(&counter);

        let result = std::panic::catch_unwind(move || {
            let _guard = counting_guard(&inner);
            panic!("engine blew up");
        });

        assert!(result.is_err());
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
