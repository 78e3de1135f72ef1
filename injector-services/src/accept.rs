//! Accept loop (§4.G): accepts connections off a `Transport`, assigns each a
//! monotonic connection id, and spawns an independent `serve_connection`
//! task per connection. On accept error, sleeps 100ms and retries rather
//! than busy-looping into an exhausted fd table. On shutdown, stops
//! accepting and waits for every spawned task to finish.

use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use monoio::io::{AsyncReadRent, AsyncWriteRent, Split};
use rustls::RootCertStore;

use injector_core::config::InjectorConfig;
use injector_core::context::ConnIdGen;
use injector_core::signing::InjectorKey;
use injector_core::transport::Transport;

use crate::common::CancelToken;
use crate::pool::ConnPool;
use crate::serve;

const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Runs the accept loop until `cancel` fires, then waits for every task it
/// spawned to finish. The drain signal is an unbounded channel nobody ever
/// sends on: every spawned task holds a cloned sender for its lifetime, and
/// `rx.recv()` only resolves once every clone (this function's own included)
/// has been dropped.
pub async fn run<T>(
    transport: T,
    config: Rc<InjectorConfig>,
    key: InjectorKey,
    pool: ConnPool,
    roots: Arc<RootCertStore>,
    cancel: CancelToken,
) where
    T: Transport,
    T::Stream: Split + AsyncReadRent + AsyncWriteRent + 'static,
{
    let conn_ids = ConnIdGen::default();
    let (drain_tx, mut drain_rx) = local_sync::mpsc::unbounded::channel::<()>();
    let mut cancelled = cancel.cancelled();

    loop {
        monoio::select! {
            _ = &mut cancelled => {
                break;
            }
            accepted = transport.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        let conn_id = conn_ids.next();
                        tracing::debug!(?conn_id, %peer, "accepted connection");
                        let config = config.clone();
                        let key = key.clone();
                        let pool = pool.clone();
                        let roots = roots.clone();
                        let cancel = cancel.clone();
                        let task_drain_tx = drain_tx.clone();
                        monoio::spawn(async move {
                            serve::serve_connection(stream, config, key, pool, roots, cancel).await;
                            drop(task_drain_tx);
                        });
                    }
                    Err(err) => {
                        tracing::warn!(?err, "accept failed, retrying");
                        monoio::time::sleep(ACCEPT_RETRY_DELAY).await;
                    }
                }
            }
        }
    }

    drop(drain_tx);
    while drain_rx.recv().await.is_some() {}
}
