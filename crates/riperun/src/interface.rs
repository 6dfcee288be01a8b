//! # Interface Schemas
//!
//! The table of methods an exported object answers to. Built once when an
//! interface is declared, then shared by every object and stub of that
//! interface.
//!
//! Methods are addressed on the wire by their signature text the first time
//! and by a 64-bit key afterwards. The key is the first eight bytes (LE) of
//! `blake3(interface "." signature)`, so both peers derive it independently.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    DuplicateMethod { interface: String, signature: String },
    KeyCollision { interface: String, first: String, second: String },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateMethod { interface, signature } => {
                write!(f, "Interface {} declares {} twice", interface, signature)
            }
            Self::KeyCollision { interface, first, second } => {
                write!(f, "Interface {}: {} and {} share a method key", interface, first, second)
            }
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Declared type of a parameter or return slot.
///
/// Only `Interface` changes runtime behavior: such slots carry live objects
/// that are exported and replaced by handles. The rest name the expected
/// value shape and appear in signature text.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    Unit,
    Bool,
    S32,
    S64,
    U64,
    F64,
    Char,
    String,
    Bytes,
    List,
    Record,
    Option,
    Any,
    Interface(String),
}

impl Type {
    pub fn interface(name: impl Into<String>) -> Self {
        Self::Interface(name.into())
    }

    /// The interface name, if this slot carries objects.
    pub fn as_interface(&self) -> Option<&str> {
        match self {
            Self::Interface(name) => Some(name),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Unit => "unit",
            Self::Bool => "bool",
            Self::S32 => "s32",
            Self::S64 => "s64",
            Self::U64 => "u64",
            Self::F64 => "f64",
            Self::Char => "char",
            Self::String => "string",
            Self::Bytes => "bytes",
            Self::List => "list",
            Self::Record => "record",
            Self::Option => "option",
            Self::Any => "any",
            Self::Interface(name) => name,
        };
        f.write_str(name)
    }
}

/// Signature text of a method: `name(t1,t2)`.
pub fn signature_of(name: &str, params: &[Type]) -> String {
    let params: Vec<String> = params.iter().map(Type::to_string).collect();
    format!("{}({})", name, params.join(","))
}

/// Stable wire key of `signature` within `interface`.
pub fn method_key(interface: &str, signature: &str) -> u64 {
    let mut hasher = blake3::Hasher::new();
    hasher.update(interface.as_bytes());
    hasher.update(b".");
    hasher.update(signature.as_bytes());
    let hash = hasher.finalize();
    let mut key = [0u8; 8];
    key.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_le_bytes(key)
}

/// One callable method of an interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    name: String,
    params: Vec<Type>,
    returns: Type,
    signature: String,
    key: u64,
}

impl Method {
    fn new(interface: &str, name: String, params: Vec<Type>, returns: Type) -> Self {
        let signature = signature_of(&name, &params);
        let key = method_key(interface, &signature);
        Self { name, params, returns, signature, key }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn params(&self) -> &[Type] {
        &self.params
    }

    pub fn returns(&self) -> &Type {
        &self.returns
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn key(&self) -> u64 {
        self.key
    }
}

/// A named set of methods with precomputed lookup tables.
#[derive(Debug)]
pub struct Interface {
    name: String,
    methods: Vec<Arc<Method>>,
    by_key: HashMap<u64, usize>,
    by_signature: HashMap<String, usize>,
}

impl Interface {
    pub fn builder(name: impl Into<String>) -> InterfaceBuilder {
        InterfaceBuilder { name: name.into(), methods: Vec::new() }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn methods(&self) -> &[Arc<Method>] {
        &self.methods
    }

    /// First method declared under `name`. Use `by_signature` to pick a
    /// specific overload.
    pub fn method(&self, name: &str) -> Option<&Arc<Method>> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn by_key(&self, key: u64) -> Option<&Arc<Method>> {
        self.by_key.get(&key).map(|&i| &self.methods[i])
    }

    pub fn by_signature(&self, signature: &str) -> Option<&Arc<Method>> {
        self.by_signature.get(signature).map(|&i| &self.methods[i])
    }
}

pub struct InterfaceBuilder {
    name: String,
    methods: Vec<(String, Vec<Type>, Type)>,
}

impl InterfaceBuilder {
    pub fn method(
        mut self,
        name: impl Into<String>,
        params: impl IntoIterator<Item = Type>,
        returns: Type,
    ) -> Self {
        self.methods.push((name.into(), params.into_iter().collect(), returns));
        self
    }

    pub fn build(self) -> Result<Arc<Interface>> {
        let mut iface = Interface {
            name: self.name,
            methods: Vec::with_capacity(self.methods.len()),
            by_key: HashMap::new(),
            by_signature: HashMap::new(),
        };

        for (name, params, returns) in self.methods {
            let method = Method::new(&iface.name, name, params, returns);
            if iface.by_signature.contains_key(&method.signature) {
                return Err(Error::DuplicateMethod {
                    interface: iface.name,
                    signature: method.signature,
                });
            }
            if let Some(&other) = iface.by_key.get(&method.key) {
                return Err(Error::KeyCollision {
                    first: iface.methods[other].signature.clone(),
                    second: method.signature,
                    interface: iface.name,
                });
            }
            let index = iface.methods.len();
            iface.by_signature.insert(method.signature.clone(), index);
            iface.by_key.insert(method.key, index);
            iface.methods.push(Arc::new(method));
        }

        Ok(Arc::new(iface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> Arc<Interface> {
        Interface::builder("test.Service")
            .method("test", [Type::S32], Type::S32)
            .method("test", [Type::String], Type::S32)
            .method("addCallback", [Type::interface("test.Callback")], Type::Unit)
            .method("getSubService", [], Type::interface("test.SubService"))
            .build()
            .unwrap()
    }

    #[test]
    fn test_signature_text() {
        let iface = service();
        let sigs: Vec<&str> = iface.methods().iter().map(|m| m.signature()).collect();
        assert_eq!(
            sigs,
            ["test(s32)", "test(string)", "addCallback(test.Callback)", "getSubService()"]
        );
    }

    #[test]
    fn test_lookup_tables_agree() {
        let iface = service();
        for method in iface.methods() {
            assert_eq!(iface.by_key(method.key()), Some(method));
            assert_eq!(iface.by_signature(method.signature()), Some(method));
        }
        assert_eq!(iface.method("test").unwrap().params(), &[Type::S32]);
        assert!(iface.by_signature("test()").is_none());
    }

    #[test]
    fn test_keys_depend_on_interface() {
        assert_eq!(method_key("a.A", "f()"), method_key("a.A", "f()"));
        assert_ne!(method_key("a.A", "f()"), method_key("a.B", "f()"));
        assert_ne!(method_key("a.A", "f()"), method_key("a.A", "g()"));
    }

    #[test]
    fn test_duplicate_signature_rejected() {
        let err = Interface::builder("a.A")
            .method("f", [Type::S32], Type::Unit)
            .method("f", [Type::S32], Type::Bool)
            .build()
            .unwrap_err();
        assert_eq!(err, Error::DuplicateMethod { interface: "a.A".into(), signature: "f(s32)".into() });
    }
}
