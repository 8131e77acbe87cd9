//! Sponsorship payload encoding.
//!
//! The sponsor contract parses its data field positionally:
//!
//! ```text
//! reserved(1) || token(20) || spend_cap(32, big-endian) || signature(..)
//! ```
//!
//! Any other order is rejected on-chain, so the layout lives in exactly one place.

use alloy_primitives::{Address, Bytes, U256};

use crate::error::EncodingError;

/// Length of the fixed-size header preceding the signature.
pub const HEADER_LEN: usize = 1 + 20 + 32;

/// Inputs for one sponsorship payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SponsorshipPayload<'a> {
    /// Version / mode byte, currently always `0`.
    pub reserved: u8,
    /// Token the sponsor is reimbursed in.
    pub token: Address,
    /// Maximum token amount the sponsor may pull.
    pub spend_cap: U256,
    /// Normalized authorization signature.
    pub signature: &'a [u8],
}

impl SponsorshipPayload<'_> {
    /// Serializes the payload.
    ///
    /// # Errors
    ///
    /// [`EncodingError::EmptySignature`] when no signature is attached.
    pub fn encode(&self) -> Result<Bytes, EncodingError> {
        if self.signature.is_empty() {
            return Err(EncodingError::EmptySignature);
        }
        let mut out = Vec::with_capacity(HEADER_LEN + self.signature.len());
        out.push(self.reserved);
        out.extend_from_slice(self.token.as_slice());
        out.extend_from_slice(&self.spend_cap.to_be_bytes::<32>());
        out.extend_from_slice(self.signature);
        Ok(out.into())
    }
}
