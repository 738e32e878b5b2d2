//! Application state shared across handlers.

use std::sync::Arc;

use secrecy::ExposeSecret;

use crate::config::AppConfig;
use crate::multipass::{MultipassError, Multipassify};
use crate::shopify::StorefrontClient;

/// Application state shared across all handlers.
///
/// Cheaply cloneable via `Arc`. Generic over the Storefront API query
/// capability so the handoff pipeline can be exercised against a mock
/// upstream; production wiring uses [`StorefrontClient`]. The multipass
/// codec is built once here because key derivation is deterministic for a
/// fixed secret; the shared instance is read-only after construction.
pub struct AppState<S = StorefrontClient> {
    inner: Arc<AppStateInner<S>>,
}

impl<S> Clone for AppState<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct AppStateInner<S> {
    config: AppConfig,
    storefront: S,
    multipass: Multipassify,
}

impl AppState {
    /// Create the production application state.
    ///
    /// # Errors
    ///
    /// Returns an error if the multipass secret is unusable.
    pub fn new(config: AppConfig) -> Result<Self, MultipassError> {
        let storefront = StorefrontClient::new(&config.shopify);
        Self::with_storefront(config, storefront)
    }
}

impl<S> AppState<S> {
    /// Build state around an explicit query capability.
    ///
    /// # Errors
    ///
    /// Returns an error if the multipass secret is unusable.
    pub fn with_storefront(config: AppConfig, storefront: S) -> Result<Self, MultipassError> {
        let multipass = Multipassify::new(config.shopify.multipass_secret.expose_secret())?;

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                storefront,
                multipass,
            }),
        })
    }

    /// Get a reference to the configuration.
    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Get a reference to the Storefront API query capability.
    #[must_use]
    pub fn storefront(&self) -> &S {
        &self.inner.storefront
    }

    /// Get a reference to the shared multipass codec.
    #[must_use]
    pub fn multipass(&self) -> &Multipassify {
        &self.inner.multipass
    }
}
