//! Background credential renewal.

use chrono::Utc;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::TokenStore;

/// Shortest pause between two renewal checks.
const MIN_CHECK_INTERVAL: Duration = Duration::from_secs(1);

/// Handle to a running renewal task.
pub struct RenewalHandle {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl RenewalHandle {
    /// Whether the task has been asked to stop.
    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stops the task and waits for it. Later calls return immediately.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, "Renewal task ended abnormally");
            }
        }
    }
}

impl Drop for RenewalHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Spawns a task that logs in again `lead` before the credential expires.
///
/// For credentials that live less than twice `lead`, renewal happens at half
/// their lifetime instead. Failed renewals are logged and retried after `retry_interval`; the stale
/// credential stays in place for the next synchronous
/// [`TokenStore::ensure_valid`]. Must be called inside a tokio runtime.
pub fn spawn_renewal(
    store: Arc<TokenStore>,
    lead: Duration,
    retry_interval: Duration,
    cancel: CancellationToken,
) -> RenewalHandle {
    let task = tokio::spawn(run(store, lead, retry_interval, cancel.clone()));
    RenewalHandle {
        cancel,
        task: Mutex::new(Some(task)),
    }
}

async fn run(
    store: Arc<TokenStore>,
    lead: Duration,
    retry_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::debug!(lead_secs = lead.as_secs(), "Credential renewal started");
    let mut failed = false;

    loop {
        let lead = effective_lead(lead, store.lifetime().await);
        let wait = if failed {
            retry_interval
        } else {
            next_check(&store, lead, retry_interval).await
        };

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        match store.refresh_if_expiring(lead).await {
            Ok(true) => {
                tracing::debug!("Credential renewed in background");
                failed = false;
            }
            Ok(false) => failed = false,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    retry_in_secs = retry_interval.as_secs(),
                    "Background renewal failed, keeping current credential"
                );
                failed = true;
            }
        }
    }

    tracing::debug!("Credential renewal stopped");
}

/// Caps `lead` at half the credential lifetime.
fn effective_lead(lead: Duration, lifetime: Option<Duration>) -> Duration {
    match lifetime {
        Some(lifetime) => lead.min(lifetime / 2),
        None => lead,
    }
}

async fn next_check(store: &TokenStore, lead: Duration, idle: Duration) -> Duration {
    let Some(expires_at) = store.expires_at().await else {
        return idle;
    };
    let until_expiry = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=250));
    until_expiry
        .saturating_sub(lead)
        .saturating_add(jitter)
        .max(MIN_CHECK_INTERVAL)
}
