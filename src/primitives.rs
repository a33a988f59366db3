//! Fixed-width byte newtypes used throughout the wallet.
//!
//! All 32-byte quantities (hashes, compressed points, scalars) are distinct
//! types so a key image can never be passed where a transaction hash is
//! expected. Every type serializes as a lowercase hex string, both on the
//! daemon wire and in the persisted wallet document.

use std::fmt;
use std::str::FromStr;

macro_rules! bytes32_newtype {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub struct $name(pub [u8; 32]);

        impl $name {
            /// The all-zero sentinel value.
            pub const NULL: $name = $name([0u8; 32]);

            /// Wraps raw bytes.
            #[must_use]
            pub fn from_bytes(bytes: [u8; 32]) -> Self {
                Self(bytes)
            }

            /// Returns the underlying bytes.
            #[must_use]
            pub fn as_bytes(&self) -> &[u8; 32] {
                &self.0
            }

            /// Returns `true` if this is the all-zero sentinel.
            #[must_use]
            pub fn is_null(&self) -> bool {
                self.0 == [0u8; 32]
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({})"), hex::encode(self.0))
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let decoded = hex::decode(s)?;
                let bytes: [u8; 32] = decoded
                    .try_into()
                    .map_err(|_| hex::FromHexError::InvalidStringLength)?;
                Ok(Self(bytes))
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(&hex::encode(self.0))
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let encoded = <String as serde::Deserialize>::deserialize(deserializer)?;
                encoded.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

bytes32_newtype!(
    /// A 256-bit hash (block hash, transaction hash, payment id seed).
    Hash256
);

bytes32_newtype!(
    /// A compressed public key point.
    PublicKey
);

bytes32_newtype!(
    /// A secret scalar.
    ///
    /// The all-zero value is the null sentinel used for view-only wallets,
    /// where the private spend key and private ephemerals are unavailable.
    SecretKey
);

bytes32_newtype!(
    /// The spend nullifier of a one-time output: `p * Hp(P)`.
    ///
    /// View-only wallets cannot derive key images and use [`KeyImage::NULL`].
    KeyImage
);

bytes32_newtype!(
    /// An ECDH shared secret between a transaction key and a view key.
    KeyDerivation
);

/// A single ring signature: the `(c, r)` scalar pair for one ring member.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct Signature {
    /// The challenge scalar.
    pub c: [u8; 32],
    /// The response scalar.
    pub r: [u8; 32],
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", hex::encode(self.c), hex::encode(self.r))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

impl FromStr for Signature {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let decoded = hex::decode(s)?;
        if decoded.len() != 64 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut c = [0u8; 32];
        let mut r = [0u8; 32];
        c.copy_from_slice(&decoded[..32]);
        r.copy_from_slice(&decoded[32..]);
        Ok(Signature { c, r })
    }
}

impl serde::Serialize for Signature {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> serde::Deserialize<'de> for Signature {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let encoded = <String as serde::Deserialize>::deserialize(deserializer)?;
        encoded.parse().map_err(serde::de::Error::custom)
    }
}
