//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! POST /multipass-checkout  - Multipass single-sign-on handoff
//! ```

pub mod multipass;

use axum::Router;
use axum::routing::post;

use crate::shopify::QueryShop;
use crate::state::AppState;

/// Create all routes for the handoff service.
///
/// Generic over the Storefront API query capability carried by
/// [`AppState`]; the binary instantiates it with the production client.
pub fn routes<S>() -> Router<AppState<S>>
where
    S: QueryShop + Send + Sync + 'static,
{
    Router::new().route(
        "/multipass-checkout",
        post(multipass::checkout::<S>).fallback(multipass::method_not_allowed),
    )
}
