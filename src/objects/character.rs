//! Player and NPC characters (`mr`).

use std::sync::Arc;

use super::{parse_serial, GameObject, ObjectRegistry, RegistryError};

/// A character on the peer, identified by serial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Character {
    serial: i64,
}

impl Character {
    /// Wire signature for characters.
    pub const SIGNATURE: &'static str = "mr";

    /// Character with the given serial.
    pub fn new(serial: i64) -> Self {
        Self { serial }
    }

    /// Register the character factory.
    pub fn register(registry: &mut ObjectRegistry) -> Result<(), RegistryError> {
        registry.register(Self::SIGNATURE, |data| {
            let object: Arc<dyn GameObject> = Arc::new(Self::new(parse_serial(data)?));
            Ok(object)
        })
    }
}

impl GameObject for Character {
    fn signature(&self) -> &str {
        Self::SIGNATURE
    }

    fn serial(&self) -> i64 {
        self.serial
    }
}
