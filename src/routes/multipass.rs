//! Multipass checkout handoff endpoint.
//!
//! `POST /multipass-checkout` with body `{"checkoutUrl": "..."}`. For a
//! logged-in shopper the handler fetches the customer profile, encrypts it
//! into a multipass token and responds with the signed login URL for the
//! checkout domain.
//!
//! The pipeline is strictly sequential: method check, body parse, session,
//! access token, customer fetch, customer validation, token generation.
//! Any step can bail out to a terminal failure, and every failure is an
//! HTTP 200 carrying `loggedIn: false` plus the original checkout URL so
//! the client can fall back to guest checkout; a raw error status would
//! break that contract. The single exception is the 405 for non-POST
//! methods.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use chrono::{SecondsFormat, Utc};
use serde::Deserialize;
use serde_json::json;
use tower_sessions::Session;
use tracing::{debug, error};

use crate::middleware::session::CUSTOMER_ACCESS_TOKEN_KEY;
use crate::multipass::MultipassPayload;
use crate::shopify::QueryShop;
use crate::shopify::customer::{LookupError, fetch_customer};
use crate::state::AppState;

/// Terminal failure states of the handoff pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandoffError {
    MissingCheckoutUrl,
    MissingSession,
    MissingCustomerAccessToken,
    FailedFetchingCustomer,
    MissingCustomer,
    InvalidCustomer,
    FailedGeneratingMultipass,
    /// Catch-all for faults outside the taxonomy. The detail is logged,
    /// never sent to the client.
    Unknown(String),
}

impl HandoffError {
    /// Stable error code for this failure kind.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::MissingCheckoutUrl => "MISSING_CHECKOUT_URL",
            Self::MissingSession => "MISSING_SESSION",
            Self::MissingCustomerAccessToken => "MISSING_CUSTOMER_ACCESS_TOKEN",
            Self::FailedFetchingCustomer => "FAILED_FETCHING_CUSTOMER",
            Self::MissingCustomer => "MISSING_CUSTOMER",
            Self::InvalidCustomer => "INVALID_CUSTOMER",
            Self::FailedGeneratingMultipass => "FAILED_GENERATING_MULTIPASS",
            Self::Unknown(_) => "UNKNOWN_ERROR",
        }
    }

    /// Client-facing message for this failure kind.
    ///
    /// These strings are an external contract with the checkout frontend
    /// and must stay byte-for-byte stable, typos included.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        match self {
            Self::MissingCheckoutUrl => "Required checkoutUrl url was not provided.",
            Self::MissingSession => "No session found.",
            Self::MissingCustomerAccessToken => "No customerAccessToken found.",
            Self::FailedFetchingCustomer => "The was a problem fetching the associated customer.",
            Self::MissingCustomer => "No associated customer data found.",
            Self::InvalidCustomer => "The associated customer data is not valid .",
            Self::FailedGeneratingMultipass => "Could not generate a multipass url.",
            Self::Unknown(_) => "UNKNOWN_ERROR",
        }
    }
}

/// Request body for the handoff endpoint.
#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    #[serde(rename = "checkoutUrl", default)]
    checkout_url: Option<String>,
}

/// `POST /multipass-checkout`
///
/// Always responds 200 with the handoff envelope; failures downgrade to a
/// guest-checkout signal rather than an error status.
pub async fn checkout<S>(
    State(state): State<AppState<S>>,
    session: Result<Session, (StatusCode, &'static str)>,
    headers: HeaderMap,
    body: Result<Json<CheckoutRequest>, JsonRejection>,
) -> Response
where
    S: QueryShop + Send + Sync + 'static,
{
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => {
            // Unreadable body goes through the same catch-all arm as any
            // other unexpected fault; the client still gets its envelope.
            return failure(None, &HandoffError::Unknown(rejection.to_string()));
        }
    };

    let Some(checkout_url) = request.checkout_url.filter(|url| !url.is_empty()) else {
        return failure(None, &HandoffError::MissingCheckoutUrl);
    };

    let session = match session {
        Ok(session) => session,
        Err((_, reason)) => {
            error!(reason, "session capability unavailable during multipass handoff");
            return failure(Some(&checkout_url), &HandoffError::MissingSession);
        }
    };

    let buyer_ip = buyer_ip(&headers);

    match run_handoff(&state, &session, &checkout_url, buyer_ip.as_deref()).await {
        Ok(url) => success(&url),
        Err(err) => failure(Some(&checkout_url), &err),
    }
}

/// 405 arm for non-POST methods; the one response that skips the handoff
/// envelope.
pub async fn method_not_allowed() -> Response {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        Json(json!({ "data": null, "error": "Method not allowed." })),
    )
        .into_response()
}

/// The sequential handoff pipeline after body and session validation.
async fn run_handoff<S>(
    state: &AppState<S>,
    session: &Session,
    checkout_url: &str,
    buyer_ip: Option<&str>,
) -> Result<String, HandoffError>
where
    S: QueryShop + Send + Sync,
{
    let customer_access_token = match session.get::<String>(CUSTOMER_ACCESS_TOKEN_KEY).await {
        Err(err) => {
            error!(error = %err, "session store failure during multipass handoff");
            return Err(HandoffError::MissingSession);
        }
        Ok(token) => token
            .filter(|token| !token.is_empty())
            .ok_or(HandoffError::MissingCustomerAccessToken)?,
    };

    let profile = fetch_customer(state.storefront(), &customer_access_token, buyer_ip)
        .await
        .map_err(|err| match err {
            LookupError::Upstream(message) => {
                error!(%message, "failed fetching customer for multipass handoff");
                HandoffError::FailedFetchingCustomer
            }
            LookupError::NotFound => HandoffError::MissingCustomer,
            LookupError::Invalid => HandoffError::InvalidCustomer,
        })?;

    let payload = MultipassPayload {
        email: profile.email,
        first_name: profile.first_name,
        last_name: profile.last_name,
        phone: profile.phone,
        created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        // Verbatim: the verifier must redirect to the exact URL the
        // shopper started with.
        return_to: checkout_url.to_owned(),
    };

    let url = state
        .multipass()
        .generate_url(&payload, &state.config().shopify.checkout_domain)
        .map_err(|err| {
            error!(error = %err, "failed generating multipass url");
            HandoffError::FailedGeneratingMultipass
        })?;

    if url.is_empty() {
        return Err(HandoffError::FailedGeneratingMultipass);
    }

    Ok(url)
}

fn success(url: &str) -> Response {
    (
        StatusCode::OK,
        Json(json!({ "data": { "url": url, "loggedIn": true, "error": null } })),
    )
        .into_response()
}

/// Failure envelope: HTTP 200 with the original checkout URL echoed so the
/// client can fall back to guest checkout.
fn failure(url: Option<&str>, error: &HandoffError) -> Response {
    if let HandoffError::Unknown(detail) = error {
        error!(detail = %detail, "multipass handoff failed outside the error taxonomy");
    } else {
        debug!(code = error.code(), "multipass handoff declined");
    }
    (
        StatusCode::OK,
        Json(json!({
            "data": { "url": url, "loggedIn": false },
            "error": error.message(),
        })),
    )
        .into_response()
}

/// First hop of `X-Forwarded-For`, when the proxy provides it.
fn buyer_ip(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-forwarded-for")?
        .to_str()
        .ok()?
        .split(',')
        .next()
        .map(|ip| ip.trim().to_owned())
        .filter(|ip| !ip.is_empty())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use axum::routing::get;
    use secrecy::SecretString;
    use serde_json::{Value, json};
    use tower::ServiceExt;
    use tower_sessions::{MemoryStore, SessionManagerLayer};

    use super::*;
    use crate::config::{AppConfig, ShopifyConfig};
    use crate::multipass::Multipassify;
    use crate::routes;
    use crate::shopify::{GraphQlPayload, ShopifyError};

    const TEST_SECRET: &str = "kT9mQ4xW7rB2nF8vZ3cJ6hL1pD5sG0aY";

    /// Canned Storefront API upstream.
    #[derive(Clone)]
    struct StubShop {
        data: Value,
    }

    impl Default for StubShop {
        fn default() -> Self {
            Self {
                data: json!({ "customer": null }),
            }
        }
    }

    impl QueryShop for StubShop {
        async fn query_shop(
            &self,
            _document: &str,
            _variables: Value,
            _buyer_ip: Option<&str>,
        ) -> Result<GraphQlPayload, ShopifyError> {
            Ok(GraphQlPayload {
                data: Some(self.data.clone()),
                errors: None,
            })
        }
    }

    fn test_state(shop: StubShop) -> AppState<StubShop> {
        let config = AppConfig {
            host: "127.0.0.1".parse().unwrap(),
            port: 0,
            base_url: "http://localhost:3000".to_string(),
            shopify: ShopifyConfig {
                store: "test-shop.myshopify.com".to_string(),
                api_version: "2026-01".to_string(),
                storefront_public_token: "public-token".to_string(),
                storefront_private_token: None,
                multipass_secret: SecretString::from(TEST_SECRET),
                checkout_domain: "test-shop.myshopify.com".to_string(),
            },
            sentry_dsn: None,
        };
        AppState::with_storefront(config, shop).expect("valid test config")
    }

    fn app() -> Router {
        routes::routes()
            .layer(SessionManagerLayer::new(MemoryStore::default()))
            .with_state(test_state(StubShop::default()))
    }

    /// Router without a session layer, so the session capability is absent.
    fn app_without_sessions() -> Router {
        routes::routes().with_state(test_state(StubShop::default()))
    }

    /// Test-only login route that stores an access token in the session.
    async fn login(session: Session) -> StatusCode {
        session
            .insert(CUSTOMER_ACCESS_TOKEN_KEY, "token-123")
            .await
            .unwrap();
        StatusCode::OK
    }

    /// Router with a login route so tests can establish a shopper session.
    fn app_with_login(shop: StubShop) -> Router {
        Router::new()
            .route("/test-login", get(login))
            .merge(routes::routes())
            .layer(SessionManagerLayer::new(MemoryStore::default()))
            .with_state(test_state(shop))
    }

    /// Hit the login route and return the session cookie to replay.
    async fn establish_session(app: &Router) -> String {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/test-login")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        response
            .headers()
            .get(header::SET_COOKIE)
            .expect("session cookie")
            .to_str()
            .unwrap()
            .split(';')
            .next()
            .unwrap()
            .to_string()
    }

    async fn send(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("infallible");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("response body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    fn post_json(body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/multipass-checkout")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn test_non_post_method_is_405() {
        let request = Request::builder()
            .method("GET")
            .uri("/multipass-checkout")
            .body(Body::empty())
            .unwrap();

        let response = app().oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers().get("allow").unwrap(), "POST");

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"], Value::Null);
        assert_eq!(body["error"], "Method not allowed.");
    }

    #[tokio::test]
    async fn test_missing_checkout_url() {
        let (status, body) = send(app(), post_json("{}")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["url"], Value::Null);
        assert_eq!(body["data"]["loggedIn"], false);
        assert_eq!(body["error"], "Required checkoutUrl url was not provided.");
    }

    #[tokio::test]
    async fn test_empty_checkout_url() {
        let (status, body) = send(app(), post_json(r#"{"checkoutUrl": ""}"#)).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["url"], Value::Null);
        assert_eq!(body["error"], "Required checkoutUrl url was not provided.");
    }

    #[tokio::test]
    async fn test_missing_session_capability() {
        let (status, body) = send(
            app_without_sessions(),
            post_json(r#"{"checkoutUrl": "https://shop.example/cart/123"}"#),
        )
        .await;

        // Failure still echoes the original URL for the guest fallback.
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["url"], "https://shop.example/cart/123");
        assert_eq!(body["data"]["loggedIn"], false);
        assert_eq!(body["error"], "No session found.");
    }

    #[tokio::test]
    async fn test_missing_customer_access_token() {
        let (status, body) = send(
            app(),
            post_json(r#"{"checkoutUrl": "https://shop.example/cart/123"}"#),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["url"], "https://shop.example/cart/123");
        assert_eq!(body["data"]["loggedIn"], false);
        assert_eq!(body["error"], "No customerAccessToken found.");
    }

    #[tokio::test]
    async fn test_malformed_body_is_unknown_error() {
        let (status, body) = send(app(), post_json("not json at all")).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["url"], Value::Null);
        assert_eq!(body["data"]["loggedIn"], false);
        assert_eq!(body["error"], "UNKNOWN_ERROR");
    }

    #[tokio::test]
    async fn test_logged_in_handoff_returns_decodable_multipass_url() {
        let shop = StubShop {
            data: json!({ "customer": { "email": "a@b.com" } }),
        };
        let app = app_with_login(shop);
        let cookie = establish_session(&app).await;

        let request = Request::builder()
            .method("POST")
            .uri("/multipass-checkout")
            .header("content-type", "application/json")
            .header("cookie", cookie)
            .body(Body::from(
                r#"{"checkoutUrl": "https://shop.example/cart/123"}"#,
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["data"]["loggedIn"], true);
        assert_eq!(body["data"]["error"], Value::Null);
        assert!(body.get("error").is_none());

        let url = body["data"]["url"].as_str().expect("multipass url");
        let prefix = "https://test-shop.myshopify.com/account/login/multipass/";
        let token = url.strip_prefix(prefix).expect("login url on checkout domain");

        // The token must round-trip under the same shared secret and carry
        // the shopper back to the exact checkout URL they started with.
        let codec = Multipassify::new(TEST_SECRET).unwrap();
        let payload = codec.decode(token).unwrap();
        assert_eq!(payload.email, "a@b.com");
        assert_eq!(payload.return_to, "https://shop.example/cart/123");
    }

    #[tokio::test]
    async fn test_logged_in_handoff_with_null_customer_is_missing_customer() {
        let app = app_with_login(StubShop::default());
        let cookie = establish_session(&app).await;

        let request = Request::builder()
            .method("POST")
            .uri("/multipass-checkout")
            .header("content-type", "application/json")
            .header("cookie", cookie)
            .body(Body::from(
                r#"{"checkoutUrl": "https://shop.example/cart/123"}"#,
            ))
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["data"]["url"], "https://shop.example/cart/123");
        assert_eq!(body["data"]["loggedIn"], false);
        assert_eq!(body["error"], "No associated customer data found.");
    }

    #[tokio::test]
    async fn test_unknown_detail_never_reaches_client() {
        let response = failure(
            Some("https://shop.example/cart/123"),
            &HandoffError::Unknown("connection reset by upstream".to_string()),
        );

        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let text = String::from_utf8(bytes.to_vec()).unwrap();
        assert!(!text.contains("connection reset"));

        let body: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(body["error"], "UNKNOWN_ERROR");
    }

    #[test]
    fn test_error_code_message_table() {
        let cases = [
            (
                HandoffError::MissingCheckoutUrl,
                "MISSING_CHECKOUT_URL",
                "Required checkoutUrl url was not provided.",
            ),
            (HandoffError::MissingSession, "MISSING_SESSION", "No session found."),
            (
                HandoffError::MissingCustomerAccessToken,
                "MISSING_CUSTOMER_ACCESS_TOKEN",
                "No customerAccessToken found.",
            ),
            (
                HandoffError::FailedFetchingCustomer,
                "FAILED_FETCHING_CUSTOMER",
                "The was a problem fetching the associated customer.",
            ),
            (
                HandoffError::MissingCustomer,
                "MISSING_CUSTOMER",
                "No associated customer data found.",
            ),
            (
                HandoffError::InvalidCustomer,
                "INVALID_CUSTOMER",
                "The associated customer data is not valid .",
            ),
            (
                HandoffError::FailedGeneratingMultipass,
                "FAILED_GENERATING_MULTIPASS",
                "Could not generate a multipass url.",
            ),
            (
                HandoffError::Unknown("boom".to_string()),
                "UNKNOWN_ERROR",
                "UNKNOWN_ERROR",
            ),
        ];

        for (error, code, message) in cases {
            assert_eq!(error.code(), code);
            assert_eq!(error.message(), message);
        }
    }

    #[test]
    fn test_buyer_ip_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(buyer_ip(&headers), None);

        headers.insert("x-forwarded-for", "203.0.113.7".parse().unwrap());
        assert_eq!(buyer_ip(&headers), Some("203.0.113.7".to_string()));

        headers.insert(
            "x-forwarded-for",
            "203.0.113.7, 10.0.0.1".parse().unwrap(),
        );
        assert_eq!(buyer_ip(&headers), Some("203.0.113.7".to_string()));
    }
}
