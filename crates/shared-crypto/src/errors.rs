//! Crypto error types.

use thiserror::Error;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Signature verification failed.
    #[error("signature verification failed")]
    SignatureVerificationFailed,

    /// Invalid public key bytes.
    #[error("invalid public key")]
    InvalidPublicKey,

    /// Invalid private key / seed bytes.
    #[error("invalid private key")]
    InvalidPrivateKey,
}
