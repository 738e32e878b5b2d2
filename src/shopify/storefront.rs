//! Storefront API client: raw GraphQL over POST with `reqwest`.

use std::sync::Arc;

use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;

use crate::config::ShopifyConfig;

use super::headers::{HeaderArgs, StorefrontHeaders};
use super::{GraphQlPayload, QueryShop, ShopifyError};

#[derive(Debug, Serialize)]
struct GraphQlRequest<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<serde_json::Value>,
}

/// Client for the Shopify Storefront API.
///
/// Cheap to clone; the `reqwest` client, endpoint and header composer are
/// shared behind an `Arc`.
#[derive(Clone)]
pub struct StorefrontClient {
    inner: Arc<StorefrontClientInner>,
}

struct StorefrontClientInner {
    client: reqwest::Client,
    endpoint: String,
    public_token: String,
    private_token: Option<SecretString>,
    headers: StorefrontHeaders,
}

impl StorefrontClient {
    /// Create a new Storefront API client.
    #[must_use]
    pub fn new(config: &ShopifyConfig) -> Self {
        let endpoint = format!(
            "https://{}/api/{}/graphql.json",
            config.store, config.api_version
        );

        Self {
            inner: Arc::new(StorefrontClientInner {
                client: reqwest::Client::new(),
                endpoint,
                public_token: config.storefront_public_token.clone(),
                private_token: config.storefront_private_token.clone(),
                headers: StorefrontHeaders::new(),
            }),
        }
    }
}

impl QueryShop for StorefrontClient {
    async fn query_shop(
        &self,
        document: &str,
        variables: serde_json::Value,
        buyer_ip: Option<&str>,
    ) -> Result<GraphQlPayload, ShopifyError> {
        let private_token = self
            .inner
            .private_token
            .as_ref()
            .map(|token| token.expose_secret().to_owned());

        let header_args = HeaderArgs {
            buyer_ip,
            storefront_token: &self.inner.public_token,
            secret_token: private_token.as_deref(),
            storefront_id: None,
        };

        let mut request = self
            .inner
            .client
            .post(&self.inner.endpoint)
            .header("Content-Type", "application/json");
        for (name, value) in self.inner.headers.compose(&header_args) {
            request = request.header(name, value);
        }

        let response = request
            .json(&GraphQlRequest {
                query: document,
                variables: Some(variables),
            })
            .send()
            .await?;

        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(1);
            return Err(ShopifyError::RateLimited(retry_after));
        }

        // Read the body as text first for better error diagnostics.
        let body = response.text().await?;

        if !status.is_success() {
            tracing::error!(
                status = %status,
                body = %body.chars().take(500).collect::<String>(),
                "Storefront API returned non-success status"
            );
            return Err(ShopifyError::Status(status.as_u16()));
        }

        Ok(serde_json::from_str(&body)?)
    }
}
