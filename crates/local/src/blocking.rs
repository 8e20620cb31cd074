use crate::error::{ErrorKind, Result};
use exn::ResultExt;

/// Runs archive I/O on tokio's blocking pool.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f).await.or_raise(|| ErrorKind::Interrupted)?
}
