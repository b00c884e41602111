use std::{future::Future, time::Duration};
use tokio::runtime::Handle;

pub(crate) async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await
}

/// Spawns a detached task on the current runtime. Returns `false` if the caller is not
/// running inside a Tokio runtime.
pub(crate) fn spawn_detached<F>(f: F) -> bool
where
    F: Future<Output = ()> + Send + 'static,
{
    match Handle::try_current() {
        Ok(handle) => {
            handle.spawn(f);
            true
        }
        Err(_) => false,
    }
}
