//! EIP-6492 signature envelopes.
//!
//! A counterfactual account signs with its future validation logic, wrapped
//! in `abi.encode(factory, factoryCalldata, innerSig) ++ MAGIC`. The token
//! paymaster verifies permits against the deployed account, so the wrapper is
//! stripped before the signature is packed.

use alloy_primitives::{Address, Bytes, hex};
use alloy_sol_types::SolValue;

use crate::contract::Sig6492;

/// The fixed 32-byte magic suffix defined by [EIP-6492](https://eips.ethereum.org/EIPS/eip-6492).
pub const EIP6492_MAGIC_SUFFIX: [u8; 32] =
    hex!("6492649264926492649264926492649264926492649264926492649264926492");

/// A signature as produced by a smart account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccountSignature {
    /// An EIP-6492 wrapped signature.
    Wrapped {
        /// Account factory.
        factory: Address,
        /// Factory deployment calldata.
        factory_calldata: Bytes,
        /// Signature the deployed account validates.
        inner: Bytes,
    },
    /// A bare signature.
    Plain(Bytes),
}

/// The EIP-6492 wrapper could not be decoded.
#[derive(Debug, thiserror::Error)]
#[error("invalid EIP-6492 signature: {0}")]
pub struct SignatureFormatError(#[from] alloy_sol_types::Error);

impl AccountSignature {
    /// Classifies `bytes`, decoding the wrapper when the magic suffix is present.
    ///
    /// # Errors
    ///
    /// Returns [`SignatureFormatError`] if the suffix is present but the body
    /// does not decode.
    pub fn parse(bytes: Bytes) -> Result<Self, SignatureFormatError> {
        let is_eip6492 = bytes.len() >= 32 && bytes[bytes.len() - 32..] == EIP6492_MAGIC_SUFFIX;
        if !is_eip6492 {
            return Ok(Self::Plain(bytes));
        }
        let body = &bytes[..bytes.len() - 32];
        let sig6492 = Sig6492::abi_decode_params(body)?;
        Ok(Self::Wrapped {
            factory: sig6492.factory,
            factory_calldata: sig6492.factoryCalldata,
            inner: sig6492.innerSig,
        })
    }

    /// Wraps `inner` for an account deployed by `factory` with `factory_calldata`.
    #[must_use]
    pub fn wrap(factory: Address, factory_calldata: Bytes, inner: Bytes) -> Bytes {
        let mut out = Sig6492 {
            factory,
            factoryCalldata: factory_calldata,
            innerSig: inner,
        }
        .abi_encode_params();
        out.extend_from_slice(&EIP6492_MAGIC_SUFFIX);
        out.into()
    }

    /// The signature the deployed account validates.
    #[must_use]
    pub fn into_inner(self) -> Bytes {
        match self {
            Self::Wrapped { inner, .. } => inner,
            Self::Plain(bytes) => bytes,
        }
    }
}

/// Strips an EIP-6492 wrapper if present.
///
/// # Errors
///
/// Returns [`SignatureFormatError`] on a malformed wrapper.
pub fn unwrap_eip6492(bytes: Bytes) -> Result<Bytes, SignatureFormatError> {
    AccountSignature::parse(bytes).map(AccountSignature::into_inner)
}
