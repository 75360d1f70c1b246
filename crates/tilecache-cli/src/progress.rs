//! Status line rendering on stderr.

use std::future::Future;
use std::io::{self, Write};

use tokio::sync::watch;

use tilecache_core::{CacheError, CacheStatus, OfflineCacheManager};

/// Clear the current terminal line
const CLEAR_LINE: &str = "\r\x1b[2K";

/// Print every busy message until the channel closes.
async fn report(mut status: watch::Receiver<CacheStatus>) {
    while status.changed().await.is_ok() {
        let busy = status.borrow_and_update().busy.clone();
        if let Some(busy) = busy {
            let mut stderr = io::stderr().lock();
            let _ = write!(stderr, "{}{}", CLEAR_LINE, busy);
            let _ = stderr.flush();
        }
    }
}

/// Run one manager operation while showing its progress.
/// The first Ctrl+C cancels the operation; its result is still awaited.
pub async fn run_with_progress<T>(
    manager: &OfflineCacheManager,
    operation: impl Future<Output = Result<T, CacheError>>,
) -> Result<T, CacheError> {
    let reporter = tokio::spawn(report(manager.subscribe()));

    tokio::pin!(operation);
    let mut interrupted = false;
    let result = loop {
        tokio::select! {
            result = &mut operation => break result,
            _ = tokio::signal::ctrl_c(), if !interrupted => {
                interrupted = true;
                eprint!("{}Cancelling...", CLEAR_LINE);
                manager.cancel();
            }
        }
    };

    reporter.abort();
    eprint!("{}", CLEAR_LINE);
    result
}
