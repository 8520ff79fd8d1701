//! Wrappers around some of the [sodiumoxide] crypto primitives.
//!
//! The wrappers provide methods defined on structs instead of the sodiumoxide functions. This is
//! done for the `Ed25519` signature key pairs and their seeds as well as the `SHA256` hash
//! function. Hashes, public keys and signatures travel as lowercase hex strings in JSON.
//!
//! # Examples
//! ## Hashing
//! ```
//! # use fedwatch_core::crypto::{ByteObject, Sha256};
//! let digest = Sha256::hash(b"round 1");
//! assert_eq!(digest.to_hex().len(), 64);
//! ```
//!
//! ## Signing of messages
//! ```
//! # use fedwatch_core::crypto::SigningKeyPair;
//! let keys = SigningKeyPair::generate();
//! let message = b"Hello world!".to_vec();
//! let signature = keys.secret.sign_detached(&message);
//! assert!(keys.public.verify_detached(&signature, &message));
//! ```
//!
//! [sodiumoxide]: https://docs.rs/sodiumoxide/

/// Implements hex string (de)serialization for a [`ByteObject`].
macro_rules! impl_hex_serde {
    ($type:ty) => {
        impl ::serde::Serialize for $type {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: ::serde::Serializer,
            {
                serializer.serialize_str(&$crate::crypto::ByteObject::to_hex(self))
            }
        }

        impl<'de> ::serde::Deserialize<'de> for $type {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: ::serde::Deserializer<'de>,
            {
                let s = <String as ::serde::Deserialize>::deserialize(deserializer)?;
                <$type as $crate::crypto::ByteObject>::from_hex(&s).ok_or_else(|| {
                    <D::Error as ::serde::de::Error>::custom(format!(
                        "expected {} hex encoded bytes",
                        <$type as $crate::crypto::ByteObject>::LENGTH
                    ))
                })
            }
        }
    };
}

pub(crate) mod hash;
pub(crate) mod sign;

pub use self::{
    hash::Sha256,
    sign::{PublicSigningKey, SecretSigningKey, Signature, SigningKeyPair, SigningKeySeed},
};

/// An interface for slicing into cryptographic byte objects.
pub trait ByteObject: Sized {
    /// Length in bytes of this object
    const LENGTH: usize;

    /// Creates a new object with all the bytes initialized to `0`.
    fn zeroed() -> Self;

    /// Gets the object byte representation.
    fn as_slice(&self) -> &[u8];

    /// Creates an object from the given buffer.
    ///
    /// # Errors
    /// Returns `None` if the length of the byte-slice isn't equal to the length of the object.
    fn from_slice(bytes: &[u8]) -> Option<Self>;

    /// Encodes the object as a lowercase hex string.
    fn to_hex(&self) -> String {
        hex::encode(self.as_slice())
    }

    /// Decodes an object from a hex string.
    ///
    /// # Errors
    /// Returns `None` if the string is not valid hex or has the wrong length.
    fn from_hex(s: &str) -> Option<Self> {
        hex::decode(s).ok().and_then(|bytes| Self::from_slice(&bytes))
    }
}
