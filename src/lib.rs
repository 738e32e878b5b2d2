//! Multipass single-sign-on handoff for a headless Shopify storefront.
//!
//! A logged-in shopper hitting checkout should not have to log in again on
//! the checkout domain. This service fetches the shopper's profile from
//! the Storefront API, encrypts it into a signed multipass token, and
//! hands back a login URL on the checkout domain that carries the token.
//!
//! The crate provides the handoff endpoint as a library so it can be
//! tested without a running server; the binary wires it to axum.

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod config;
pub mod middleware;
pub mod multipass;
pub mod routes;
pub mod shopify;
pub mod state;
