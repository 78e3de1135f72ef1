//! SIGINT/SIGTERM wiring (§5): signal handlers themselves must be
//! async-signal-safe, so they only flip an `AtomicBool`
//! (`signal_hook::flag::register`); a task on the same event loop polls that
//! flag and fires the cancel token, keeping `CancelToken::fire` on the
//! single thread its `Rc` internals require.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use injector_services::common::CancelToken;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

pub fn watch(cancel: CancelToken) -> anyhow::Result<()> {
    let flagged = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGINT, flagged.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, flagged.clone())?;

    monoio::spawn(async move {
        loop {
            if flagged.load(Ordering::Relaxed) {
                tracing::info!("shutdown signal received");
                cancel.fire();
                return;
            }
            monoio::time::sleep(POLL_INTERVAL).await;
        }
    });
    Ok(())
}
