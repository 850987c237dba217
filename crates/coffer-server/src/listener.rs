//! TCP accept loop. Each connection runs as its own [`Session`] task inside
//! a `JoinSet`, so every task's result (including panics) is observed and
//! logged, and shutdown can wait for sessions in flight.

use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinSet};
use tracing::{error, info, warn};

use crate::error::SessionError;
use crate::session::{Session, SessionContext, SessionOutcome};

/// How long shutdown waits for running sessions before aborting them.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Pause after the first failed accept; doubles per consecutive failure.
const ACCEPT_BACKOFF_MIN: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

type SessionResult = (SocketAddr, Result<SessionOutcome, SessionError>);

pub struct Listener {
    listener: TcpListener,
    ctx: SessionContext,
}

impl Listener {
    pub async fn bind(addr: SocketAddr, ctx: SessionContext) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self { listener, ctx })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until `shutdown` resolves, then drain.
    pub async fn serve(self, shutdown: impl Future<Output = ()>) -> std::io::Result<()> {
        let mut sessions: JoinSet<SessionResult> = JoinSet::new();
        let mut accept_failures = 0u32;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        accept_failures = 0;
                        info!(peer = %peer, active = sessions.len() + 1, "Accepted connection");
                        if let Err(e) = stream.set_nodelay(true) {
                            warn!(peer = %peer, error = %e, "Failed to set TCP_NODELAY");
                        }
                        let session = Session::new(stream, self.ctx.clone(), peer.to_string());
                        sessions.spawn(async move { (peer, session.run().await) });
                    }
                    // EMFILE and friends are transient; keep serving
                    Err(e) => {
                        accept_failures = accept_failures.saturating_add(1);
                        let pause = accept_backoff(accept_failures);
                        warn!(error = %e, failures = accept_failures, ?pause, "Accept failed");
                        tokio::time::sleep(pause).await;
                    }
                },
                Some(joined) = sessions.join_next(), if !sessions.is_empty() => report(joined),
                _ = &mut shutdown => {
                    info!(active = sessions.len(), "Stopping listener");
                    break;
                }
            }
        }

        drop(self.listener);
        let drain = async {
            while let Some(joined) = sessions.join_next().await {
                report(joined);
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(remaining = sessions.len(), "Aborting sessions still running");
            sessions.shutdown().await;
        }
        Ok(())
    }
}

fn accept_backoff(consecutive_failures: u32) -> Duration {
    let shift = consecutive_failures.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_MIN
        .saturating_mul(1 << shift)
        .min(ACCEPT_BACKOFF_MAX)
}

fn report(joined: Result<SessionResult, JoinError>) {
    match joined {
        Ok((peer, Ok(outcome))) => info!(peer = %peer, ?outcome, "Session finished"),
        Ok((peer, Err(e))) if e.is_rejection() => info!(peer = %peer, reason = %e, "Session rejected"),
        Ok((peer, Err(e))) => warn!(peer = %peer, error = %e, "Session closed with error"),
        Err(e) if e.is_panic() => error!(error = %e, "Session task panicked"),
        Err(e) => warn!(error = %e, "Session task cancelled"),
    }
}
