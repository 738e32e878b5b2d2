//! Authentication-header composition for Storefront API calls.
//!
//! Every outbound call carries exactly one credential header: the secret
//! (delegate) token when one is available, otherwise the public storefront
//! token. Buyer IP and storefront ID headers are attached when known.
//!
//! When the caller supplies no secret token or storefront ID, a fallback
//! lookup against the injected [`ConfigSource`] runs once per composer
//! instance, and the associated misconfiguration warnings fire exactly
//! once regardless of call volume or concurrency.

use std::sync::OnceLock;

use tracing::{error, warn};

/// Secret (delegate) access token header. Presence suppresses rate limiting.
pub const STOREFRONT_API_SECRET_TOKEN_HEADER: &str = "Shopify-Storefront-Private-Token";
/// Public access token header.
pub const STOREFRONT_API_PUBLIC_TOKEN_HEADER: &str = "X-Shopify-Storefront-Access-Token";
/// Shopper network address, forwarded for fraud and geo logic.
pub const STOREFRONT_API_BUYER_IP_HEADER: &str = "Shopify-Storefront-Buyer-IP";
/// Ties API calls to a storefront's analytics dashboard entry.
pub const SHOPIFY_STOREFRONT_ID_HEADER: &str = "Shopify-Storefront-Id";

/// Legacy key for the implicit secret-token fallback. Deprecated.
const SECRET_TOKEN_FALLBACK_KEY: &str = "SHOPIFY_STOREFRONT_API_SECRET_TOKEN";
/// Legacy key for the implicit storefront-ID fallback. Deprecated.
const STOREFRONT_ID_FALLBACK_KEY: &str = "SHOPIFY_STOREFRONT_ID";

/// Key/value configuration lookup.
///
/// Injected rather than read as ambient global state so tests can supply
/// a fresh source per composer instance.
pub trait ConfigSource: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// [`ConfigSource`] backed by process environment variables.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnvSource;

impl ConfigSource for EnvSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

/// Per-call inputs to header composition.
#[derive(Debug, Clone, Copy)]
pub struct HeaderArgs<'a> {
    pub buyer_ip: Option<&'a str>,
    pub storefront_token: &'a str,
    pub secret_token: Option<&'a str>,
    pub storefront_id: Option<&'a str>,
}

/// Composes Storefront API request headers.
///
/// The two `OnceLock`s are the only shared state: they cache the fallback
/// resolution results and guarantee the warnings cannot double-fire under
/// concurrent first calls.
pub struct StorefrontHeaders<C: ConfigSource = EnvSource> {
    source: C,
    fallback_secret_token: OnceLock<Option<String>>,
    fallback_storefront_id: OnceLock<Option<String>>,
}

impl StorefrontHeaders {
    /// Composer reading fallbacks from process environment variables.
    #[must_use]
    pub fn new() -> Self {
        Self::with_source(EnvSource)
    }
}

impl Default for StorefrontHeaders {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: ConfigSource> StorefrontHeaders<C> {
    /// Composer with an explicit configuration source.
    pub const fn with_source(source: C) -> Self {
        Self {
            source,
            fallback_secret_token: OnceLock::new(),
            fallback_storefront_id: OnceLock::new(),
        }
    }

    /// Build the header list for one outbound call.
    ///
    /// Pure mapping construction apart from the one-shot fallback warnings;
    /// safe to call concurrently from many in-flight requests.
    pub fn compose(&self, args: &HeaderArgs<'_>) -> Vec<(&'static str, String)> {
        let mut headers = Vec::with_capacity(3);

        let secret_token = match non_empty(args.secret_token) {
            Some(token) => Some(token.to_owned()),
            None => self
                .fallback_secret_token
                .get_or_init(|| self.resolve_secret_token())
                .clone(),
        };

        // Exactly one credential header per call; the secret token wins.
        match secret_token {
            Some(token) => headers.push((STOREFRONT_API_SECRET_TOKEN_HEADER, token)),
            None => headers.push((
                STOREFRONT_API_PUBLIC_TOKEN_HEADER,
                args.storefront_token.to_owned(),
            )),
        }

        if let Some(buyer_ip) = non_empty(args.buyer_ip) {
            headers.push((STOREFRONT_API_BUYER_IP_HEADER, buyer_ip.to_owned()));
        }

        let storefront_id = match non_empty(args.storefront_id) {
            Some(id) => Some(id.to_owned()),
            None => self
                .fallback_storefront_id
                .get_or_init(|| self.resolve_storefront_id())
                .clone(),
        };

        if let Some(id) = storefront_id {
            headers.push((SHOPIFY_STOREFRONT_ID_HEADER, id));
        }

        headers
    }

    fn resolve_secret_token(&self) -> Option<String> {
        let token = self.source.get(SECRET_TOKEN_FALLBACK_KEY).filter(|t| !t.is_empty());
        if token.is_some() {
            warn!(
                "The secret Storefront API token was resolved implicitly from \
                 {SECRET_TOKEN_FALLBACK_KEY}. This path is deprecated; configure the \
                 token explicitly."
            );
        } else {
            error!(
                "No secret Storefront API token was defined. Calls to the Storefront \
                 API will be rate limited."
            );
        }
        token
    }

    fn resolve_storefront_id(&self) -> Option<String> {
        let id = self.source.get(STOREFRONT_ID_FALLBACK_KEY).filter(|v| !v.is_empty());
        if id.is_some() {
            warn!(
                "The storefront ID was resolved implicitly from \
                 {STOREFRONT_ID_FALLBACK_KEY}. This path is deprecated; configure the \
                 ID explicitly."
            );
        } else {
            warn!(
                "No storefront ID was defined. This breaks the analytics dashboard \
                 entry for this storefront."
            );
        }
        id
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}
