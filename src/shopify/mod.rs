//! Shopify Storefront API plumbing.
//!
//! # Architecture
//!
//! - Raw GraphQL over POST with `reqwest`; the handoff contract treats the
//!   commerce API as an opaque `query(document, variables)` capability, so
//!   there is no codegen layer here.
//! - [`headers`] composes the authentication headers for every outbound
//!   call, choosing between the public and the secret token.
//! - [`customer`] looks up the minimal profile the multipass payload needs.

pub mod customer;
pub mod headers;
mod storefront;

pub use storefront::StorefrontClient;

use serde::Deserialize;
use thiserror::Error;

/// Errors that can occur when talking to the Storefront API.
#[derive(Debug, Error)]
pub enum ShopifyError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Rate limited by Shopify.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Non-success HTTP status outside the rate-limit case.
    #[error("Storefront API returned status {0}")]
    Status(u16),
}

/// Raw GraphQL response envelope from the Storefront API.
///
/// Query-level errors ride alongside `data`; callers inspect both rather
/// than getting a pre-digested result, mirroring the wire shape.
#[derive(Debug, Deserialize)]
pub struct GraphQlPayload {
    pub data: Option<serde_json::Value>,
    pub errors: Option<Vec<GraphQlError>>,
}

/// A query-level error returned by the Storefront API.
#[derive(Debug, Clone, Deserialize)]
pub struct GraphQlError {
    pub message: String,
}

/// Opaque query capability against the Storefront API.
///
/// The handoff pipeline depends on this trait rather than the concrete
/// client so the lookup logic can be exercised against a mock upstream.
pub trait QueryShop {
    /// Execute a GraphQL document with the given variables.
    ///
    /// `buyer_ip` is forwarded to Shopify for fraud and geo logic when the
    /// inbound request carries one.
    fn query_shop(
        &self,
        document: &str,
        variables: serde_json::Value,
        buyer_ip: Option<&str>,
    ) -> impl Future<Output = Result<GraphQlPayload, ShopifyError>> + Send;
}
