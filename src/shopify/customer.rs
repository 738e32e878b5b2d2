//! Customer profile lookup for the multipass handoff.
//!
//! Fetches the minimal profile fields the multipass payload needs, keyed
//! by the shopper's customer access token. One upstream attempt, no
//! retries; the handler maps each failure to its public error code.

use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use super::QueryShop;

/// Fixed query for the profile fields embedded in the multipass payload.
pub const CUSTOMER_INFO_QUERY: &str = r"
query CustomerInfo($customerAccessToken: String!) {
  customer(customerAccessToken: $customerAccessToken) {
    firstName
    lastName
    phone
    email
  }
}
";

/// Why a customer lookup failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LookupError {
    /// Transport failure or a query-level error list; carries the first
    /// upstream message when one exists.
    #[error("customer query failed: {0}")]
    Upstream(String),

    /// The access token resolved to no customer object.
    #[error("no customer associated with the access token")]
    NotFound,

    /// A customer object came back without a usable email address.
    #[error("customer record is missing an email address")]
    Invalid,
}

/// Minimal customer profile, validated: `email` is always non-empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CustomerProfile {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub phone: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CustomerData {
    customer: Option<WireCustomer>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireCustomer {
    #[serde(default)]
    email: Option<String>,
    first_name: Option<String>,
    last_name: Option<String>,
    phone: Option<String>,
}

/// Fetch the customer profile for an access token.
///
/// # Errors
///
/// - `Upstream` for transport failures, query-level errors or an
///   unparseable response shape,
/// - `NotFound` when no customer object came back,
/// - `Invalid` when the customer has no email.
pub async fn fetch_customer<Q: QueryShop>(
    shop: &Q,
    customer_access_token: &str,
    buyer_ip: Option<&str>,
) -> Result<CustomerProfile, LookupError> {
    let payload = shop
        .query_shop(
            CUSTOMER_INFO_QUERY,
            json!({ "customerAccessToken": customer_access_token }),
            buyer_ip,
        )
        .await
        .map_err(|e| LookupError::Upstream(e.to_string()))?;

    // Any errors list marks the lookup as failed, even an empty one;
    // customer data riding alongside it is not trusted.
    if let Some(errors) = payload.errors {
        let message = errors.first().map_or_else(
            || "(no error details provided)".to_string(),
            |first| first.message.clone(),
        );
        return Err(LookupError::Upstream(message));
    }

    let data: CustomerData = payload
        .data
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| LookupError::Upstream(e.to_string()))?
        .unwrap_or(CustomerData { customer: None });

    let Some(customer) = data.customer else {
        return Err(LookupError::NotFound);
    };

    match customer.email {
        Some(email) if !email.is_empty() => Ok(CustomerProfile {
            email,
            first_name: customer.first_name,
            last_name: customer.last_name,
            phone: customer.phone,
        }),
        _ => Err(LookupError::Invalid),
    }
}
