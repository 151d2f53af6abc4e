use std::future::Future;

use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InitState {
    NotStarted,
    Done,
}

/// Lazy, resettable one-time initializer.
///
/// Concurrent callers serialize on the inner mutex, so while one holds it the
/// work is effectively in-progress for everyone else. Success latches `Done`;
/// failure resets to `NotStarted` so the next caller retries.
#[derive(Debug)]
pub struct InitCell {
    state: Mutex<InitState>,
}

impl Default for InitCell {
    fn default() -> Self {
        Self::new()
    }
}

impl InitCell {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(InitState::NotStarted),
        }
    }

    pub async fn get_or_init<E, F>(&self, init: F) -> Result<(), E>
    where
        F: Future<Output = Result<(), E>>,
    {
        let mut state = self.state.lock().await;
        if *state == InitState::Done {
            return Ok(());
        }
        init.await?;
        *state = InitState::Done;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn runs_once_on_success() {
        let cell = InitCell::new();
        let runs = AtomicU32::new(0);
        for _ in 0..3 {
            cell.get_or_init::<(), _>(async {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        }
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failure_resets_for_retry() {
        let cell = InitCell::new();
        let runs = AtomicU32::new(0);

        let failed: Result<(), &str> = cell
            .get_or_init(async {
                runs.fetch_add(1, Ordering::SeqCst);
                Err("storage down")
            })
            .await;
        assert!(failed.is_err());

        cell.get_or_init::<&str, _>(async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        // Latched now.
        cell.get_or_init::<&str, _>(async {
            runs.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .await
        .unwrap();
        assert_eq!(runs.load(Ordering::SeqCst), 2);
    }
}
