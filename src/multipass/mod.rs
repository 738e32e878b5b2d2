//! Multipass token codec and login URL builder.
//!
//! A multipass token is an encrypted, signed bundle of customer identity
//! data. The checkout domain verifies the signature, decrypts the payload
//! and logs the shopper in before redirecting to `return_to`, so the
//! shopper lands on checkout already authenticated.
//!
//! # Token format
//!
//! Both keys are derived from the shared multipass secret: the SHA-256
//! digest of the secret is split in half, the first 16 bytes keying
//! AES-128-CBC encryption and the last 16 bytes keying the HMAC-SHA256
//! signature (encrypt-then-MAC). The verifier derives the same keys
//! independently, so the derivation must stay deterministic.
//!
//! ```text
//! ciphertext = IV || AES-128-CBC(PKCS7(json(payload)))
//! signature  = HMAC-SHA256(sig_key, ciphertext)
//! token      = base64url(ciphertext) "." base64url(signature)
//! ```
//!
//! Base64 is the URL-safe alphabet without padding so the token can ride
//! in a path segment unescaped.

use aes::Aes128;
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;
type HmacSha256 = Hmac<Sha256>;

/// AES block size; the IV prefixed to every ciphertext.
const IV_LEN: usize = 16;

/// Delimiter between the ciphertext and signature segments of a token.
const TOKEN_SEPARATOR: char = '.';

/// Errors raised while building a token or login URL.
#[derive(Debug, Error)]
pub enum MultipassError {
    /// The shared multipass secret is empty.
    #[error("multipass secret must not be empty")]
    InvalidSecret,

    /// The checkout domain is empty.
    #[error("checkout domain must not be empty")]
    InvalidDomain,

    /// The customer payload could not be serialized. Should not occur for
    /// well-formed payloads; treated as internal.
    #[error("failed to serialize multipass payload: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors raised while verifying and decrypting a token.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// Structural problem: missing delimiter, bad base64 or a ciphertext
    /// too short to carry an IV.
    #[error("malformed multipass token")]
    MalformedToken,

    /// The recomputed HMAC does not match the signature segment.
    #[error("multipass token signature mismatch")]
    SignatureMismatch,

    /// Signature checked out but the ciphertext did not decrypt to a
    /// valid payload.
    #[error("failed to decrypt multipass token")]
    DecryptionFailure,
}

/// The exact structure encrypted into a multipass token.
///
/// Profile fields keep the camelCase spelling the Storefront API returns;
/// `created_at` and `return_to` are the envelope fields the verifier
/// requires. `return_to` must carry the caller's checkout URL verbatim so
/// the verifier redirects to the destination the shopper started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultipassPayload {
    pub email: String,
    #[serde(rename = "firstName", skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(rename = "lastName", skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    /// Token generation time, ISO-8601. The verifier rejects stale tokens.
    pub created_at: String,
    /// Checkout URL to land on after login, verbatim.
    pub return_to: String,
}

/// Multipass codec for a fixed shared secret.
///
/// Key derivation is pure and deterministic, so one instance can be built
/// at startup and shared across requests; it is read-only after
/// construction.
#[derive(Clone)]
pub struct Multipassify {
    encryption_key: [u8; IV_LEN],
    mac: HmacSha256,
}

impl Multipassify {
    /// Derive the encryption and signature keys from the shared secret.
    ///
    /// # Errors
    ///
    /// Returns `MultipassError::InvalidSecret` if the secret is empty.
    pub fn new(secret: &str) -> Result<Self, MultipassError> {
        if secret.trim().is_empty() {
            return Err(MultipassError::InvalidSecret);
        }

        let digest = Sha256::digest(secret.as_bytes());
        let (enc, sig) = digest.split_at(IV_LEN);

        let mut encryption_key = [0u8; IV_LEN];
        encryption_key.copy_from_slice(enc);

        let mac =
            HmacSha256::new_from_slice(sig).map_err(|_| MultipassError::InvalidSecret)?;

        Ok(Self {
            encryption_key,
            mac,
        })
    }

    /// Encrypt and sign a payload into an opaque token string.
    ///
    /// # Errors
    ///
    /// Returns `MultipassError::Serialization` if the payload cannot be
    /// serialized to JSON.
    pub fn generate_token(&self, payload: &MultipassPayload) -> Result<String, MultipassError> {
        let plaintext = serde_json::to_vec(payload)?;

        let mut iv = [0u8; IV_LEN];
        rand::rng().fill_bytes(&mut iv);

        let mut ciphertext = iv.to_vec();
        ciphertext.extend(
            Aes128CbcEnc::new(&self.encryption_key.into(), &iv.into())
                .encrypt_padded_vec_mut::<Pkcs7>(&plaintext),
        );

        let signature = self.sign(&ciphertext);

        Ok(format!(
            "{}{TOKEN_SEPARATOR}{}",
            URL_SAFE_NO_PAD.encode(&ciphertext),
            URL_SAFE_NO_PAD.encode(signature),
        ))
    }

    /// Build the login URL the shopper is redirected to.
    ///
    /// The canonical shape is `https://{domain}/account/login/multipass/{token}`.
    /// The checkout URL is already embedded in the token payload; it is
    /// never appended as a query parameter.
    ///
    /// # Errors
    ///
    /// Returns `MultipassError::InvalidDomain` if `domain` is empty, or a
    /// token generation error.
    pub fn generate_url(
        &self,
        payload: &MultipassPayload,
        domain: &str,
    ) -> Result<String, MultipassError> {
        if domain.trim().is_empty() {
            return Err(MultipassError::InvalidDomain);
        }

        let token = self.generate_token(payload)?;
        Ok(format!("https://{domain}/account/login/multipass/{token}"))
    }

    /// Verify and decrypt a token back into its payload.
    ///
    /// The handoff happy path never calls this; it exists because the
    /// token's entire purpose is external verification, and the reading
    /// side must be expressible with the same key material.
    ///
    /// # Errors
    ///
    /// Returns a `DecodeError` describing which stage rejected the token.
    pub fn decode(&self, token: &str) -> Result<MultipassPayload, DecodeError> {
        let (ciphertext_b64, signature_b64) = token
            .split_once(TOKEN_SEPARATOR)
            .ok_or(DecodeError::MalformedToken)?;

        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64)
            .map_err(|_| DecodeError::MalformedToken)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| DecodeError::MalformedToken)?;

        if ciphertext.len() <= IV_LEN {
            return Err(DecodeError::MalformedToken);
        }

        // Constant-time comparison via the Mac trait.
        let mut mac = self.mac.clone();
        mac.update(&ciphertext);
        mac.verify_slice(&signature)
            .map_err(|_| DecodeError::SignatureMismatch)?;

        let (iv, body) = ciphertext.split_at(IV_LEN);
        let plaintext = Aes128CbcDec::new_from_slices(&self.encryption_key, iv)
            .map_err(|_| DecodeError::DecryptionFailure)?
            .decrypt_padded_vec_mut::<Pkcs7>(body)
            .map_err(|_| DecodeError::DecryptionFailure)?;

        serde_json::from_slice(&plaintext).map_err(|_| DecodeError::DecryptionFailure)
    }

    fn sign(&self, ciphertext: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(ciphertext);
        mac.finalize().into_bytes().to_vec()
    }
}
