//! Redemption codes: signed, time-boxed, single-use payloads.
//!
//! A code is `base64url(json-claim) "." base64url(hmac-sha256-tag)`. The tag
//! covers the serialized claim end-to-end, so neither the embedded timestamp
//! nor the nonce can be forged by a client between generation and terminal
//! validation. Verification is a pure function of the bytes, the shared key,
//! and the trusted clock; no transport is assumed.

use crate::error::RedemptionError;
use crate::types::{BranchId, PromotionId, RedemptionId, UserId};
use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::fmt;

type HmacSha256 = Hmac<Sha256>;

/// Number of random bytes in a nonce (before base64url encoding).
const NONCE_BYTES: usize = 24;

// ============================================================================
// Nonce
// ============================================================================

/// Single-use random token bound to one redemption attempt.
///
/// Generated fresh for every issued code and only persisted when a redemption
/// succeeds; the unique index on the persisted value is what rejects replays.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Nonce(String);

impl Nonce {
    /// Generates a fresh cryptographically random nonce.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; NONCE_BYTES];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(URL_SAFE_NO_PAD.encode(bytes))
    }

    /// Reconstructs a nonce from its stored representation.
    #[must_use]
    pub const fn from_string(value: String) -> Self {
        Self(value)
    }

    /// The encoded token.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Claim & code
// ============================================================================

/// The authenticated payload inside a redemption code.
///
/// The booking is located at validation time by the embedded
/// `(user_id, promotion_id)` pair; the single-pending invariant guarantees at
/// most one match.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionClaim {
    /// Promotion being redeemed
    pub promotion_id: PromotionId,
    /// User redeeming it
    pub user_id: UserId,
    /// Replay token, fresh per issued code
    pub nonce: Nonce,
    /// Server-side issue time, bounded by `max_code_age` at validation
    pub issued_at: DateTime<Utc>,
}

/// An encoded, signed redemption code as presented in a QR payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedemptionCode(String);

impl RedemptionCode {
    /// Wraps an already-encoded code received from a terminal.
    #[must_use]
    pub const fn from_string(value: String) -> Self {
        Self(value)
    }

    /// The transport encoding of the code.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RedemptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Signer
// ============================================================================

/// HMAC-SHA256 signer/verifier for redemption codes.
///
/// The key is shared between the issuing service and the terminals' backend;
/// terminals themselves never see it.
#[derive(Clone)]
pub struct CodeSigner {
    key: Vec<u8>,
}

impl fmt::Debug for CodeSigner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodeSigner").finish_non_exhaustive()
    }
}

impl CodeSigner {
    /// Creates a signer from the shared secret.
    #[must_use]
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: secret.to_vec(),
        }
    }

    fn mac(&self) -> Result<HmacSha256, RedemptionError> {
        // HMAC accepts any key length; the error arm is unreachable but the
        // API is fallible, and we refuse to panic here.
        HmacSha256::new_from_slice(&self.key).map_err(|_| RedemptionError::InvalidSignature)
    }

    /// Serializes and signs a claim into a transportable code.
    ///
    /// # Errors
    ///
    /// [`RedemptionError::Unknown`] if the claim fails to serialize.
    pub fn sign(&self, claim: &RedemptionClaim) -> Result<RedemptionCode, RedemptionError> {
        let payload = serde_json::to_vec(claim).map_err(|_| RedemptionError::Unknown)?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        let tag = mac.finalize().into_bytes();

        Ok(RedemptionCode(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(&payload),
            URL_SAFE_NO_PAD.encode(tag)
        )))
    }

    /// Verifies a code's authenticity and recovers the claim.
    ///
    /// Any malformed encoding, undecodable payload, or tag mismatch collapses
    /// into `InvalidSignature`; the terminal learns nothing about which part
    /// failed.
    ///
    /// # Errors
    ///
    /// [`RedemptionError::InvalidSignature`].
    pub fn verify(&self, code: &RedemptionCode) -> Result<RedemptionClaim, RedemptionError> {
        let (payload_b64, tag_b64) = code
            .0
            .split_once('.')
            .ok_or(RedemptionError::InvalidSignature)?;

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| RedemptionError::InvalidSignature)?;
        let tag = URL_SAFE_NO_PAD
            .decode(tag_b64)
            .map_err(|_| RedemptionError::InvalidSignature)?;

        let mut mac = self.mac()?;
        mac.update(&payload);
        mac.verify_slice(&tag)
            .map_err(|_| RedemptionError::InvalidSignature)?;

        serde_json::from_slice(&payload).map_err(|_| RedemptionError::InvalidSignature)
    }
}

// ============================================================================
// Redeemed coupon
// ============================================================================

/// Audit record of a completed redemption.
///
/// Created atomically with the booking's `Pending -> Used` transition; never
/// updated afterwards.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RedeemedCoupon {
    /// Identity
    pub id: RedemptionId,
    /// Redeeming user
    pub user_id: UserId,
    /// Branch terminal that validated the code
    pub branch_id: BranchId,
    /// Redeemed promotion
    pub promotion_id: PromotionId,
    /// Server timestamp of the redemption
    pub used_at: DateTime<Utc>,
    /// The spent nonce; unique across all successful redemptions
    pub nonce: Nonce,
    /// Issue time carried in the validated code
    pub code_issued_at: DateTime<Utc>,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn claim() -> RedemptionClaim {
        RedemptionClaim {
            promotion_id: PromotionId::new(),
            user_id: UserId::new(),
            nonce: Nonce::generate(),
            issued_at: Utc::now(),
        }
    }

    #[test]
    fn sign_then_verify_recovers_claim() {
        let signer = CodeSigner::new(b"test-secret");
        let claim = claim();
        let code = signer.sign(&claim).unwrap();
        let recovered = signer.verify(&code).unwrap();
        assert_eq!(recovered, claim);
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let code = CodeSigner::new(b"key-a").sign(&claim()).unwrap();
        assert!(matches!(
            CodeSigner::new(b"key-b").verify(&code),
            Err(RedemptionError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_rejects_tampered_payload() {
        let signer = CodeSigner::new(b"test-secret");
        let original = claim();
        let code = signer.sign(&original).unwrap();

        // Graft the valid tag onto a payload claiming a different user.
        let forged_claim = RedemptionClaim {
            user_id: UserId::new(),
            ..original
        };
        let forged_payload =
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&forged_claim).unwrap());
        let tag = code.as_str().split_once('.').unwrap().1;
        let forged = RedemptionCode::from_string(format!("{forged_payload}.{tag}"));

        assert!(matches!(
            signer.verify(&forged),
            Err(RedemptionError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_rejects_garbage() {
        let signer = CodeSigner::new(b"test-secret");
        for garbage in ["", "no-dot", "a.b", "!!!.???"] {
            assert!(matches!(
                signer.verify(&RedemptionCode::from_string(garbage.to_string())),
                Err(RedemptionError::InvalidSignature)
            ));
        }
    }

    #[test]
    fn nonces_are_unique_per_generation() {
        let first = Nonce::generate();
        let second = Nonce::generate();
        assert_ne!(first, second);
        assert!(!first.as_str().is_empty());
    }
}
