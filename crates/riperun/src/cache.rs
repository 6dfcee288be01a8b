//! # Identifier Cache
//!
//! Per-connection memoization of what the peer has already told us (or what
//! we already told the peer): signature text behind each method key, the
//! method each key resolved to, and the interface name behind each handle.
//! Entries are never evicted.

use std::sync::Arc;

use dashmap::DashMap;
use riperpc::RemoteInstance;

use crate::interface::Method;

#[derive(Default)]
struct ClassCache {
    signatures: DashMap<u64, String>,
    /// `None` remembers a key that resolved to nothing.
    methods: DashMap<u64, Option<Arc<Method>>>,
}

#[derive(Default)]
pub struct IdentifierCache {
    classes: DashMap<String, Arc<ClassCache>>,
    class_names: DashMap<RemoteInstance, String>,
}

impl IdentifierCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn class(&self, class: &str) -> Arc<ClassCache> {
        if let Some(entry) = self.classes.get(class) {
            return entry.clone();
        }
        self.classes.entry(class.to_string()).or_default().clone()
    }

    pub fn has_signature(&self, class: &str, key: u64) -> bool {
        self.classes
            .get(class)
            .is_some_and(|c| c.signatures.contains_key(&key))
    }

    /// Stores `signature` when given, otherwise returns what was stored
    /// earlier for `key`.
    pub fn signature(&self, class: &str, signature: Option<&str>, key: u64) -> Option<String> {
        match signature {
            Some(sig) => {
                self.record_signature(class, key, sig);
                Some(sig.to_string())
            }
            None => self
                .classes
                .get(class)
                .and_then(|c| c.signatures.get(&key).map(|s| s.clone())),
        }
    }

    pub fn record_signature(&self, class: &str, key: u64, signature: &str) {
        self.class(class)
            .signatures
            .entry(key)
            .or_insert_with(|| signature.to_string());
    }

    /// Outer `None`: never resolved. Inner `None`: resolved to nothing.
    pub fn method(&self, class: &str, key: u64) -> Option<Option<Arc<Method>>> {
        self.classes
            .get(class)
            .and_then(|c| c.methods.get(&key).map(|m| m.clone()))
    }

    pub fn store_method(&self, class: &str, key: u64, method: Option<Arc<Method>>) {
        self.class(class).methods.insert(key, method);
    }

    /// Interface name of `instance`, remembered on first sight. Keyed by the
    /// whole handle since every global shares instance id 0.
    pub fn class_name(&self, instance: &RemoteInstance) -> String {
        if let Some(name) = self.class_names.get(instance) {
            return name.clone();
        }
        self.class_names
            .entry(instance.clone())
            .or_insert_with(|| instance.interface_name().to_string())
            .clone()
    }

    pub fn has_class(&self, instance: &RemoteInstance) -> bool {
        self.class_names.contains_key(instance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::Interface;
    use crate::interface::Type;

    #[test]
    fn test_signature_store_then_fetch() {
        let cache = IdentifierCache::new();
        assert!(!cache.has_signature("a.A", 7));
        assert_eq!(cache.signature("a.A", None, 7), None);

        assert_eq!(cache.signature("a.A", Some("f()"), 7).as_deref(), Some("f()"));
        assert!(cache.has_signature("a.A", 7));
        assert_eq!(cache.signature("a.A", None, 7).as_deref(), Some("f()"));
        assert!(!cache.has_signature("a.B", 7));
    }

    #[test]
    fn test_method_misses_are_remembered() {
        let iface = Interface::builder("a.A").method("f", [], Type::Unit).build().unwrap();
        let f = iface.method("f").unwrap().clone();
        let cache = IdentifierCache::new();

        assert_eq!(cache.method("a.A", 1), None);
        cache.store_method("a.A", 1, None);
        assert_eq!(cache.method("a.A", 1), Some(None));
        cache.store_method("a.A", f.key(), Some(f.clone()));
        assert_eq!(cache.method("a.A", f.key()), Some(Some(f)));
    }

    #[test]
    fn test_class_names_per_handle() {
        let cache = IdentifierCache::new();
        let service = RemoteInstance::global("a.Service");
        let other = RemoteInstance::global("a.Other");
        let exported = RemoteInstance::new(9, "a.Service");

        assert!(!cache.has_class(&service));
        assert_eq!(cache.class_name(&service), "a.Service");
        assert!(cache.has_class(&service));

        // globals share id 0 but keep their own names
        assert!(!cache.has_class(&other));
        assert_eq!(cache.class_name(&other), "a.Other");
        assert_eq!(cache.class_name(&service), "a.Service");
        assert_eq!(cache.class_name(&exported), "a.Service");
    }
}
