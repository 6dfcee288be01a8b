//! Remote object identity.

use std::fmt;

/// Instance id reserved for globally registered singletons.
pub const GLOBAL_INSTANCE_ID: u64 = 0;

/// Identity handle for an object living on one side of a connection.
///
/// Crosses the wire verbatim; never carries the referenced object itself.
/// Equality and hashing are by `(interface_name, instance_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemoteInstance {
    instance_id: u64,
    interface_name: String,
}

impl RemoteInstance {
    pub fn new(instance_id: u64, interface_name: impl Into<String>) -> Self {
        Self { instance_id, interface_name: interface_name.into() }
    }

    /// The handle of the well-known singleton for `interface_name`.
    pub fn global(interface_name: impl Into<String>) -> Self {
        Self::new(GLOBAL_INSTANCE_ID, interface_name)
    }

    /// A handle with a fresh random id, never colliding with the global id.
    pub fn random(interface_name: impl Into<String>) -> Self {
        let mut id = rand::random::<u64>();
        while id == GLOBAL_INSTANCE_ID {
            id = rand::random::<u64>();
        }
        Self::new(id, interface_name)
    }

    pub fn instance_id(&self) -> u64 {
        self.instance_id
    }

    pub fn interface_name(&self) -> &str {
        &self.interface_name
    }

    pub fn is_global(&self) -> bool {
        self.instance_id == GLOBAL_INSTANCE_ID
    }
}

impl fmt::Display for RemoteInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:016x}", self.interface_name, self.instance_id)
    }
}
