//! Optimistic local mutation with guaranteed rollback.

use std::future::Future;

/// Runs `revert` when dropped unless `commit` was called first.
///
/// Dropping covers every way out of a scope: an error return, a panic
/// unwinding through it, or the enclosing future being cancelled.
pub struct Rollback<F: FnOnce()> {
    revert: Option<F>,
}

impl<F: FnOnce()> Rollback<F> {
    pub fn new(revert: F) -> Self {
        Self {
            revert: Some(revert),
        }
    }

    pub fn commit(mut self) {
        self.revert = None;
    }
}

impl<F: FnOnce()> Drop for Rollback<F> {
    fn drop(&mut self) {
        if let Some(revert) = self.revert.take() {
            revert();
        }
    }
}

/// Apply `mutate_local` immediately, then build and await the request from
/// `send_remote`.
///
/// If `mutate_local` fails, nothing else runs: `send_remote` is never called.
/// Once the local mutation has been applied, `revert_local` runs on every
/// path except a successful remote result.
pub async fn apply_optimistic<T, E, M, S, Fut, R>(mutate_local: M, send_remote: S, revert_local: R) -> Result<T, E>
where
    M: FnOnce() -> Result<(), E>,
    S: FnOnce() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    R: FnOnce(),
{
    mutate_local()?;
    let rollback = Rollback::new(revert_local);

    let result = send_remote().await;
    if result.is_ok() {
        rollback.commit();
    }
    result
}
