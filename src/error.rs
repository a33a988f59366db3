//! Saffron sync error module.
//!
//! Errors are layered per concern: crypto, node transport, scanning, the sync
//! loop, and the public wallet boundary. Transport and transient daemon errors
//! are recovered locally (retry next tick, batch back-off, dead-node signal);
//! scan integrity errors surface up and abort the block before any store
//! mutation; configuration and validation errors return synchronously from the
//! public API as a [`WalletError`] with a stable numeric code.

use crate::primitives::{Hash256, PublicKey};

/// Errors from the crypto capability.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// A compressed point failed to decompress.
    #[error("invalid public key point {0}")]
    InvalidPublicKey(PublicKey),
    /// A key derivation failed to decompress.
    #[error("invalid key derivation")]
    InvalidDerivation,
    /// A key image failed to decompress.
    #[error("invalid key image")]
    InvalidKeyImage,
    /// Signing material was requested but the secret key is the null sentinel.
    #[error("secret key unavailable. wallet is view-only or key is held on an external device")]
    MissingSecretKey,
    /// The real input index is outside the ring.
    #[error("real input index {index} out of range for ring of size {ring_size}")]
    InvalidRealIndex {
        /// Index of the real input within the ring.
        index: usize,
        /// Number of ring members.
        ring_size: usize,
    },
}

/// Errors associated with connecting to the daemon and receiving invalid data.
#[derive(Debug, thiserror::Error)]
pub enum NodeError {
    /// The request failed at the transport layer.
    #[error("daemon request failed. {0}")]
    Transport(#[from] reqwest::Error),
    /// The daemon returned a response that could not be interpreted.
    #[error("daemon returned a malformed response. {0}")]
    MalformedResponse(String),
    /// The daemon rejected a submitted transaction.
    #[error("daemon rejected transaction with code {code}. {message}")]
    Rejected {
        /// Daemon-assigned error code.
        code: i64,
        /// Daemon-supplied reason.
        message: String,
    },
}

/// Errors raised while scanning a block.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// Crypto failure while deriving output keys.
    #[error("crypto error while scanning. {0}")]
    Crypto(#[from] CryptoError),
    /// The daemon did not return a global index required to make an input
    /// spendable. Treated as a scan integrity failure (malicious or broken
    /// node); the block is not committed.
    #[error(
        "missing global index for output {output_index} of transaction {transaction}. refusing to commit block"
    )]
    MissingGlobalIndexes {
        /// Hash of the transaction that created the output.
        transaction: Hash256,
        /// Index of the output within that transaction.
        output_index: u64,
    },
}

/// Top level error for a sync tick.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Scan error.
    #[error("scan error. {0}")]
    Scan(#[from] ScanError),
    /// Node error.
    #[error("node error. {0}")]
    Node(#[from] NodeError),
}

/// An error crossing the public wallet boundary.
///
/// Every variant maps to a stable numeric code via [`WalletError::error_code`];
/// no other failure shape is surfaced to callers of the public API.
#[derive(Debug, thiserror::Error)]
pub enum WalletError {
    /// The daemon could not be reached.
    #[error("failed to contact the daemon. {0}")]
    TransportError(String),
    /// The daemon responded with data the wallet could not interpret.
    #[error("the daemon returned a malformed response. {0}")]
    MalformedResponse(String),
    /// An address failed validation (length, alphabet or prefix).
    #[error("the address given is invalid. {0}")]
    AddressInvalid(String),
    /// A mnemonic seed failed validation (length, word or checksum).
    #[error("the mnemonic seed given is invalid. {0}")]
    MnemonicInvalid(String),
    /// A key is not a valid 64 character hex string or not a valid point.
    #[error("the key given is invalid. {0}")]
    KeyFormatInvalid(String),
    /// The requested amount exceeds the spendable balance.
    #[error("not enough unlocked balance. requested {requested}, available {available}")]
    NotEnoughBalance {
        /// Atomic units requested.
        requested: u64,
        /// Atomic units available.
        available: u64,
    },
    /// An amount is zero, negative, fractional or overflows.
    #[error("the amount given is invalid. {0}")]
    AmountInvalid(String),
    /// The mixin is outside the range permitted at the current height.
    #[error("mixin {mixin} is outside the allowed range [{min}, {max}]")]
    MixinOutOfRange {
        /// Requested mixin.
        mixin: u64,
        /// Minimum permitted.
        min: u64,
        /// Maximum permitted.
        max: u64,
    },
    /// A payment id is not a valid 64 character hex string.
    #[error("the payment id given is invalid. {0}")]
    PaymentIdInvalid(String),
    /// The fee given is below the network minimum.
    #[error("fee {fee} is below the minimum of {minimum}")]
    FeeTooSmall {
        /// Fee supplied.
        fee: u64,
        /// Minimum required.
        minimum: u64,
    },
    /// The daemon rejected an operation because it is not synced.
    #[error("the daemon reported a sync error. {0}")]
    DaemonSyncError(String),
    /// The daemon withheld data required to complete a block scan.
    #[error("scan integrity failure. {0}")]
    ScanIntegrityError(String),
    /// No subwallet exists for the given public spend key.
    #[error("no subwallet found for public spend key {0}")]
    SubwalletNotFound(PublicKey),
    /// No prepared transaction exists for the given hash.
    #[error("no prepared transaction found for hash {0}")]
    PreparedTransactionNotFound(Hash256),
    /// The external signing device reported a failure.
    #[error("ledger device error. {0}")]
    LedgerError(String),
    /// The operation requires a private spend key but the wallet is view-only.
    #[error("this operation is not possible on a view-only wallet")]
    IllegalViewWalletOperation,
    /// The primary subwallet cannot be deleted.
    #[error("the primary subwallet cannot be deleted")]
    CannotDeletePrimary,
    /// A subwallet with this public spend key already exists.
    #[error("a subwallet already exists for public spend key {0}")]
    SubwalletAlreadyExists(PublicKey),
}

impl WalletError {
    /// The stable numeric code for this error kind.
    #[must_use]
    pub fn error_code(&self) -> u32 {
        match self {
            WalletError::TransportError(_) => 1,
            WalletError::MalformedResponse(_) => 2,
            WalletError::AddressInvalid(_) => 3,
            WalletError::MnemonicInvalid(_) => 4,
            WalletError::KeyFormatInvalid(_) => 5,
            WalletError::NotEnoughBalance { .. } => 6,
            WalletError::AmountInvalid(_) => 7,
            WalletError::MixinOutOfRange { .. } => 8,
            WalletError::PaymentIdInvalid(_) => 9,
            WalletError::FeeTooSmall { .. } => 10,
            WalletError::DaemonSyncError(_) => 11,
            WalletError::ScanIntegrityError(_) => 12,
            WalletError::SubwalletNotFound(_) => 13,
            WalletError::PreparedTransactionNotFound(_) => 14,
            WalletError::LedgerError(_) => 15,
            WalletError::IllegalViewWalletOperation => 16,
            WalletError::CannotDeletePrimary => 17,
            WalletError::SubwalletAlreadyExists(_) => 18,
        }
    }
}

impl From<NodeError> for WalletError {
    fn from(err: NodeError) -> Self {
        match err {
            NodeError::Transport(e) => WalletError::TransportError(e.to_string()),
            NodeError::MalformedResponse(msg) => WalletError::MalformedResponse(msg),
            NodeError::Rejected { code, message } => {
                WalletError::DaemonSyncError(format!("rejected with code {code}. {message}"))
            }
        }
    }
}

impl From<ScanError> for WalletError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::Crypto(e) => WalletError::KeyFormatInvalid(e.to_string()),
            e @ ScanError::MissingGlobalIndexes { .. } => {
                WalletError::ScanIntegrityError(e.to_string())
            }
        }
    }
}

impl From<CryptoError> for WalletError {
    fn from(err: CryptoError) -> Self {
        WalletError::KeyFormatInvalid(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        assert_eq!(WalletError::TransportError(String::new()).error_code(), 1);
        assert_eq!(
            WalletError::SubwalletNotFound(PublicKey::NULL).error_code(),
            13
        );
        assert_eq!(WalletError::CannotDeletePrimary.error_code(), 17);
    }

    #[test]
    fn scan_integrity_maps_to_code_12() {
        let err: WalletError = ScanError::MissingGlobalIndexes {
            transaction: Hash256::NULL,
            output_index: 2,
        }
        .into();
        assert_eq!(err.error_code(), 12);
    }
}
