//! Credential holder with single-flight login.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use super::{Authenticator, Credential};
use crate::errors::AuthenticationError;
use crate::transport::HttpTransport;

/// Credentials expiring within this margin are treated as expired.
pub const DEFAULT_EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// A credential together with the login generation that produced it.
#[derive(Debug, Clone)]
pub struct CredentialLease {
    /// The credential to attach.
    pub credential: Credential,
    /// Increments on every successful login.
    pub generation: u64,
}

#[derive(Default)]
struct StoreState {
    credential: Option<Credential>,
    obtained_at: Option<DateTime<Utc>>,
    generation: u64,
}

/// Holds the current credential of one client.
///
/// The async mutex is held across the validity check and the login, so
/// concurrent callers that find the credential expired wait for one login
/// instead of starting their own.
pub struct TokenStore {
    authenticator: Arc<dyn Authenticator>,
    transport: Arc<dyn HttpTransport>,
    state: Mutex<StoreState>,
    margin: Duration,
    logins: AtomicU64,
}

impl TokenStore {
    /// Creates an empty store.
    pub fn new(authenticator: Arc<dyn Authenticator>, transport: Arc<dyn HttpTransport>) -> Self {
        Self::with_margin(authenticator, transport, DEFAULT_EXPIRY_MARGIN)
    }

    /// Creates an empty store with a custom expiry margin.
    pub fn with_margin(
        authenticator: Arc<dyn Authenticator>,
        transport: Arc<dyn HttpTransport>,
        margin: Duration,
    ) -> Self {
        Self {
            authenticator,
            transport,
            state: Mutex::new(StoreState::default()),
            margin,
            logins: AtomicU64::new(0),
        }
    }

    /// Expiry margin in use.
    pub fn margin(&self) -> Duration {
        self.margin
    }

    /// The authenticator backing this store.
    pub fn authenticator(&self) -> &Arc<dyn Authenticator> {
        &self.authenticator
    }

    /// Number of logins performed so far.
    pub fn login_count(&self) -> u64 {
        self.logins.load(Ordering::SeqCst)
    }

    /// Whether `credential` is usable right now.
    pub fn is_valid(&self, credential: &Credential) -> bool {
        credential.is_valid(self.margin)
    }

    /// Returns a valid credential, logging in if needed.
    pub async fn ensure_valid(&self) -> Result<CredentialLease, AuthenticationError> {
        let mut state = self.state.lock().await;
        if let Some(lease) = self.current(&state) {
            return Ok(lease);
        }
        self.login_locked(&mut state).await
    }

    /// Replaces a credential the server rejected.
    ///
    /// When another caller already replaced generation `stale_generation`,
    /// its fresher credential is returned without a second login.
    pub async fn force_refresh(
        &self,
        stale_generation: u64,
    ) -> Result<CredentialLease, AuthenticationError> {
        let mut state = self.state.lock().await;
        if state.generation != stale_generation {
            if let Some(lease) = self.current(&state) {
                tracing::debug!(
                    stale_generation,
                    generation = state.generation,
                    "Credential already refreshed by another caller"
                );
                return Ok(lease);
            }
        }
        self.login_locked(&mut state).await
    }

    /// Logs in again if the credential expires within `lead`.
    ///
    /// Returns `Ok(false)` when nothing needed doing, including when no
    /// credential has been obtained yet.
    pub async fn refresh_if_expiring(&self, lead: Duration) -> Result<bool, AuthenticationError> {
        let mut state = self.state.lock().await;
        match &state.credential {
            Some(credential) if credential.is_valid(lead.max(self.margin)) => Ok(false),
            Some(_) => {
                self.login_locked(&mut state).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Expiry of the held credential.
    pub async fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.state
            .lock()
            .await
            .credential
            .as_ref()
            .map(Credential::expires_at)
    }

    /// Time between the last login and the expiry it granted.
    pub async fn lifetime(&self) -> Option<Duration> {
        let state = self.state.lock().await;
        let credential = state.credential.as_ref()?;
        let obtained_at = state.obtained_at?;
        (credential.expires_at() - obtained_at).to_std().ok()
    }

    /// Drops the credential and ends its session, if any.
    pub async fn logout(&self) -> Result<(), AuthenticationError> {
        let credential = {
            let mut state = self.state.lock().await;
            state.obtained_at = None;
            state.credential.take()
        };
        match credential {
            Some(credential) => {
                self.authenticator
                    .logout(self.transport.as_ref(), &credential)
                    .await
            }
            None => Ok(()),
        }
    }

    fn current(&self, state: &StoreState) -> Option<CredentialLease> {
        state
            .credential
            .as_ref()
            .filter(|c| self.is_valid(c))
            .map(|c| CredentialLease {
                credential: c.clone(),
                generation: state.generation,
            })
    }

    async fn login_locked(
        &self,
        state: &mut StoreState,
    ) -> Result<CredentialLease, AuthenticationError> {
        let name = self.authenticator.name();
        tracing::debug!(authenticator = name, "Logging in");

        let credential = match self.authenticator.login(self.transport.as_ref()).await {
            Ok(credential) => credential,
            Err(e) => {
                tracing::warn!(authenticator = name, error = %e, "Login failed");
                return Err(e);
            }
        };

        self.logins.fetch_add(1, Ordering::SeqCst);
        state.generation += 1;
        state.credential = Some(credential.clone());
        state.obtained_at = Some(Utc::now());

        tracing::info!(
            authenticator = name,
            kind = credential.kind(),
            generation = state.generation,
            expires_at = %credential.expires_at(),
            "Login succeeded"
        );

        Ok(CredentialLease {
            credential,
            generation: state.generation,
        })
    }
}
