//! Domain objects that cross the wire as typed references.
//!
//! The peer identifies every game object by a two-character type
//! signature and a numeric serial: `@mr1001` is the character with serial
//! 1001. [`ObjectRegistry`] maps signatures to factories that rebuild a
//! [`GameObject`] from that serialized form.
//!
//! Registration happens once, at startup, before any connection is
//! accepted; afterwards the registry is shared read-only.

mod character;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::constants::SIGNATURE_LENGTH;

pub use character::Character;

/// How objects are written when encoding outbound values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SerializeMethod {
    /// `@` + signature + serial. Used for script results and query targets.
    IncludeSignature,
    /// Bare serial. Used for arguments of outbound `do` requests.
    WithoutSignature,
}

/// A game object reconstructed from its wire form.
pub trait GameObject: fmt::Debug + Send + Sync {
    /// Two-character type signature (e.g. `mr`).
    fn signature(&self) -> &str;

    /// Object serial on the peer.
    fn serial(&self) -> i64;

    /// Serialized form, without the leading `@`.
    fn serialize(&self, method: SerializeMethod) -> String {
        match method {
            SerializeMethod::IncludeSignature => format!("{}{}", self.signature(), self.serial()),
            SerializeMethod::WithoutSignature => self.serial().to_string(),
        }
    }
}

/// Shared handle to a decoded object.
pub type ObjectRef = Arc<dyn GameObject>;

/// Factory that rebuilds an object from `signature + serial` text.
pub type ObjectFactory = Arc<dyn Fn(&str) -> Result<ObjectRef, ObjectError> + Send + Sync>;

/// Failure to rebuild an object from its serialized form.
#[derive(Debug, Error)]
pub enum ObjectError {
    /// No factory registered for the signature.
    #[error("Unsupported deserialization for data: {0}")]
    UnknownSignature(String),
    /// The factory rejected the payload.
    #[error("Invalid serialized object \"{data}\": {reason}")]
    Invalid {
        /// Serialized form handed to the factory.
        data: String,
        /// Why it was rejected.
        reason: String,
    },
}

/// Failure to register a factory.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// Signatures are exactly two characters.
    #[error("Signature must be {SIGNATURE_LENGTH} characters long: {0:?}")]
    InvalidSignature(String),
    /// Another factory already owns the signature.
    #[error("Signature {0:?} is already registered")]
    Duplicate(String),
}

/// Signature → factory table.
#[derive(Default)]
pub struct ObjectRegistry {
    factories: HashMap<String, ObjectFactory>,
}

impl fmt::Debug for ObjectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut signatures: Vec<_> = self.factories.keys().collect();
        signatures.sort();
        f.debug_struct("ObjectRegistry")
            .field("signatures", &signatures)
            .finish()
    }
}

impl ObjectRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in object kind registered.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        // Built-in signatures are distinct constants.
        if let Err(e) = Character::register(&mut registry) {
            log::error!("Failed to register built-in character type: {e}");
        }
        registry
    }

    /// Register a factory for `signature`.
    ///
    /// # Errors
    ///
    /// Rejects signatures that are not exactly two characters and
    /// signatures that already have a factory.
    pub fn register<F>(&mut self, signature: &str, factory: F) -> Result<(), RegistryError>
    where
        F: Fn(&str) -> Result<ObjectRef, ObjectError> + Send + Sync + 'static,
    {
        if signature.chars().count() != SIGNATURE_LENGTH {
            return Err(RegistryError::InvalidSignature(signature.to_string()));
        }
        if self.factories.contains_key(signature) {
            return Err(RegistryError::Duplicate(signature.to_string()));
        }
        log::debug!("Register deserialization method {signature:?}");
        self.factories.insert(signature.to_string(), Arc::new(factory));
        Ok(())
    }

    /// Factory for `signature`, if registered.
    pub fn resolve(&self, signature: &str) -> Option<&ObjectFactory> {
        self.factories.get(signature)
    }

    /// Rebuild an object from `signature + serial` text.
    pub fn deserialize(&self, data: &str) -> Result<ObjectRef, ObjectError> {
        let signature: String = data.chars().take(SIGNATURE_LENGTH).collect();
        let factory = self
            .resolve(&signature)
            .ok_or_else(|| ObjectError::UnknownSignature(data.to_string()))?;
        factory(data)
    }

    /// Number of registered signatures.
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Split `signature + serial` text and parse the serial.
///
/// Shared by factories for objects whose wire form is the plain
/// signature/serial pair.
pub fn parse_serial(data: &str) -> Result<i64, ObjectError> {
    let serial = data
        .char_indices()
        .nth(SIGNATURE_LENGTH)
        .map_or("", |(idx, _)| &data[idx..]);
    serial.parse::<i64>().map_err(|e| ObjectError::Invalid {
        data: data.to_string(),
        reason: e.to_string(),
    })
}
