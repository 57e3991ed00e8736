//! Periodic session ticker
//!
//! Drives [`SessionRegistry::tick`] on an interval and forwards replies that
//! have a channel to deliver them to.

use std::time::Duration;

use hark::Reply;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::SessionRegistry;

/// A reply produced by a session outside of any incoming message
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    pub session_id: String,
    /// Last channel the session saw, if any
    pub channel_id: Option<String>,
    pub reply: Reply,
}

/// Background task ticking a [`SessionRegistry`]
pub struct SessionTimer {
    shutdown_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl SessionTimer {
    /// Spawn the ticker. Outbound replies are delivered on the returned receiver.
    pub fn spawn(registry: SessionRegistry, period: Duration) -> (Self, mpsc::Receiver<Outbound>) {
        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(64);
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            interval.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Session timer shutting down");
                        break;
                    }

                    _ = interval.tick() => {
                        for out in registry.tick().await {
                            if out.channel_id.is_none() {
                                tracing::debug!(session = %out.session_id, "No channel for session reply, dropping");
                                continue;
                            }
                            if outbound_tx.send(out).await.is_err() {
                                tracing::debug!("Outbound receiver dropped");
                            }
                        }
                    }
                }
            }
        });

        tracing::debug!(period_ms = period.as_millis() as u64, "Session timer started");
        (
            Self {
                shutdown_tx,
                handle,
            },
            outbound_rx,
        )
    }

    /// Stop ticking and wait for the task to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
        if let Err(e) = self.handle.await {
            tracing::warn!(error = %e, "Session timer task failed");
        }
    }
}

impl std::fmt::Debug for SessionTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTimer")
            .field("finished", &self.handle.is_finished())
            .finish()
    }
}
