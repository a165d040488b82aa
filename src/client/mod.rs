//! Zscaler API client.

mod executor;

pub use executor::{ApiRequest, ApiResponse, RequestExecutor};

use parking_lot::Mutex;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::auth::{spawn_renewal, RenewalHandle, TokenStore};
use crate::cache::build_cache;
use crate::config::ClientConfig;
use crate::errors::{ZscalerError, ZscalerResult};
use crate::resilience::RateLimiter;
use crate::services::Service;
use crate::transport::{HttpTransport, ReqwestTransport};

/// How far ahead of expiry the background task renews, on top of the
/// expiry margin.
const RENEWAL_LEAD: Duration = Duration::from_secs(60);
/// Pause after a failed background renewal.
const RENEWAL_RETRY_INTERVAL: Duration = Duration::from_secs(30);

/// Client for one product line.
///
/// Cheap to share behind an `Arc`; every request goes through the same
/// credential store, rate limiter and cache.
pub struct ZscalerClient {
    executor: Arc<RequestExecutor>,
    shutdown: CancellationToken,
    renewal: Mutex<Option<RenewalHandle>>,
}

impl ZscalerClient {
    /// Creates a client. Missing credentials and invalid settings fail here.
    ///
    /// Background renewal starts only when called inside a tokio runtime.
    pub fn new(config: ClientConfig) -> ZscalerResult<Self> {
        config.validate()?;

        let transport: Arc<dyn HttpTransport> = match &config.transport {
            Some(transport) => Arc::clone(transport),
            None => Arc::new(ReqwestTransport::with_options(
                config.connect_timeout,
                config.proxy.as_ref(),
            )?),
        };
        let authenticator = match &config.authenticator {
            Some(authenticator) => {
                authenticator.validate()?;
                Arc::clone(authenticator)
            }
            None => config.service.authenticator(&config)?,
        };
        let cache = match &config.cache_override {
            Some(cache) => Arc::clone(cache),
            None => build_cache(&config.cache),
        };

        let tokens = Arc::new(TokenStore::with_margin(
            authenticator,
            Arc::clone(&transport),
            config.expiry_margin,
        ));
        let limiter = Arc::new(RateLimiter::new(config.rate_limits.clone()));
        let shutdown = CancellationToken::new();

        let renewal = if config.background_renewal {
            match tokio::runtime::Handle::try_current() {
                Ok(_) => Some(spawn_renewal(
                    Arc::clone(&tokens),
                    config.expiry_margin + RENEWAL_LEAD,
                    RENEWAL_RETRY_INTERVAL,
                    shutdown.child_token(),
                )),
                Err(_) => {
                    tracing::debug!("No tokio runtime, background renewal disabled");
                    None
                }
            }
        } else {
            None
        };

        tracing::debug!(
            service = %config.service,
            base_url = %config.base_url,
            authenticator = tokens.authenticator().name(),
            "Client created"
        );

        let executor = RequestExecutor::new(
            Arc::new(config),
            transport,
            tokens,
            limiter,
            cache,
            shutdown.clone(),
        );

        Ok(Self {
            executor: Arc::new(executor),
            shutdown,
            renewal: Mutex::new(renewal),
        })
    }

    /// Product line this client talks to.
    pub fn service(&self) -> Service {
        self.executor.config().service
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        self.executor.config()
    }

    /// Shared executor, for resource wrappers.
    pub fn executor(&self) -> Arc<RequestExecutor> {
        Arc::clone(&self.executor)
    }

    /// Executes a raw request.
    pub async fn execute(&self, request: ApiRequest) -> ZscalerResult<ApiResponse> {
        self.executor.execute(request).await
    }

    /// GET and decode JSON.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> ZscalerResult<T> {
        self.execute(ApiRequest::get(path)).await?.json()
    }

    /// GET with query parameters and decode JSON.
    pub async fn get_with_query<T: DeserializeOwned, Q: Serialize + ?Sized>(
        &self,
        path: &str,
        query: &Q,
    ) -> ZscalerResult<T> {
        let mut request = ApiRequest::get(path);
        let encoded = serde_urlencoded::to_string(query)
            .map_err(|e| ZscalerError::Response(e.to_string()))?;
        request.query = url::form_urlencoded::parse(encoded.as_bytes())
            .into_owned()
            .collect();
        self.execute(request).await?.json()
    }

    /// POST a JSON body and decode JSON.
    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ZscalerResult<T> {
        self.execute(ApiRequest::post(path).with_json(body)?)
            .await?
            .json()
    }

    /// PUT a JSON body and decode JSON.
    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ZscalerResult<T> {
        self.execute(ApiRequest::put(path).with_json(body)?)
            .await?
            .json()
    }

    /// PATCH a JSON body and decode JSON.
    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> ZscalerResult<T> {
        self.execute(ApiRequest::patch(path).with_json(body)?)
            .await?
            .json()
    }

    /// DELETE; the response body is ignored.
    pub async fn delete(&self, path: &str) -> ZscalerResult<()> {
        self.execute(ApiRequest::delete(path)).await?;
        Ok(())
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Stops background renewal, cancels in-flight retries and ends the
    /// session. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();

        let renewal = self.renewal.lock().take();
        if let Some(renewal) = renewal {
            renewal.stop().await;
        }

        if let Err(e) = self.executor.tokens().logout().await {
            tracing::warn!(error = %e, "Logout failed");
        }
        tracing::debug!(service = %self.service(), "Client shut down");
    }
}

impl Drop for ZscalerClient {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
