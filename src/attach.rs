//! Per-connection attachment store.
//!
//! Shared objects (sessions, repositories, service clients) are attached to a
//! connection once, usually from the accept callback, and resolved later by
//! handler factories and push encoders. Entries are keyed either by the
//! attached type or by an explicit name, so several implementations of one
//! capability can live side by side.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use framewire::Attachments;
//!
//! trait Greeter: Send + Sync {
//!     fn greet(&self) -> &'static str;
//! }
//! struct English;
//! impl Greeter for English {
//!     fn greet(&self) -> &'static str { "hello" }
//! }
//!
//! struct Session { user: String }
//!
//! let store = Attachments::new();
//! store.attach(Arc::new(Session { user: "ana".into() })).unwrap();
//! store.attach_named::<dyn Greeter>("en", Arc::new(English));
//!
//! assert_eq!(store.get::<Session>().unwrap().user, "ana");
//! assert_eq!(store.get_named::<dyn Greeter>("en").unwrap().greet(), "hello");
//! ```

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{FramewireError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum AttachKey {
    Type(TypeId),
    Named(String),
}

/// Keyed bag of shared objects, safe for concurrent reads and writes.
#[derive(Default)]
pub struct Attachments {
    /// Each value is a boxed `Arc<T>` for the type it was attached as.
    entries: RwLock<HashMap<AttachKey, Box<dyn Any + Send + Sync>>>,
}

impl Attachments {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an object keyed by its type.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateAttachment` if an object of this type is already
    /// attached; the existing entry is left untouched.
    pub fn attach<T>(&self, value: Arc<T>) -> Result<()>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        let key = AttachKey::Type(TypeId::of::<T>());
        let mut entries = self.entries.write();
        if entries.contains_key(&key) {
            return Err(FramewireError::DuplicateAttachment(type_name::<T>()));
        }
        entries.insert(key, Box::new(value));
        Ok(())
    }

    /// Attach an object under an explicit name, replacing any previous one.
    pub fn attach_named<T>(&self, name: impl Into<String>, value: Arc<T>)
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .write()
            .insert(AttachKey::Named(name.into()), Box::new(value));
    }

    /// Resolve an object by type.
    pub fn get<T>(&self) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup(&AttachKey::Type(TypeId::of::<T>()))
    }

    /// Resolve an object by name.
    ///
    /// Returns `None` if nothing is attached under `name` or it was attached
    /// as a different type.
    pub fn get_named<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.lookup(&AttachKey::Named(name.to_string()))
    }

    /// Check whether an object of type `T` is attached.
    pub fn exists<T>(&self) -> bool
    where
        T: ?Sized + 'static,
    {
        self.entries
            .read()
            .contains_key(&AttachKey::Type(TypeId::of::<T>()))
    }

    /// Check whether anything is attached under `name`.
    pub fn exists_named(&self, name: &str) -> bool {
        self.entries
            .read()
            .contains_key(&AttachKey::Named(name.to_string()))
    }

    /// Number of attached objects.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    fn lookup<T>(&self, key: &AttachKey) -> Option<Arc<T>>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.entries
            .read()
            .get(key)
            .and_then(|value| value.downcast_ref::<Arc<T>>())
            .cloned()
    }
}

impl std::fmt::Debug for Attachments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Attachments")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Session {
        id: u32,
    }

    trait Store: Send + Sync {
        fn name(&self) -> &'static str;
    }

    struct Memory;
    impl Store for Memory {
        fn name(&self) -> &'static str {
            "memory"
        }
    }

    struct Disk;
    impl Store for Disk {
        fn name(&self) -> &'static str {
            "disk"
        }
    }

    #[test]
    fn test_attach_and_get_by_type() {
        let store = Attachments::new();
        store.attach(Arc::new(Session { id: 7 })).unwrap();

        assert!(store.exists::<Session>());
        assert_eq!(store.get::<Session>().unwrap().id, 7);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_attach_same_instance_twice_rejected() {
        let store = Attachments::new();
        let session = Arc::new(Session { id: 1 });

        store.attach(session.clone()).unwrap();
        let err = store.attach(session).unwrap_err();

        assert!(matches!(err, FramewireError::DuplicateAttachment(name) if name.ends_with("Session")));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_duplicate_does_not_replace_first() {
        let store = Attachments::new();
        store.attach(Arc::new(Session { id: 1 })).unwrap();
        assert!(store.attach(Arc::new(Session { id: 2 })).is_err());

        assert_eq!(store.get::<Session>().unwrap().id, 1);
    }

    #[test]
    fn test_missing_type_resolves_none() {
        let store = Attachments::new();
        assert!(store.get::<Session>().is_none());
        assert!(!store.exists::<Session>());
        assert!(store.is_empty());
    }

    #[test]
    fn test_named_implementations_coexist() {
        let store = Attachments::new();
        store.attach_named::<dyn Store>("fast", Arc::new(Memory));
        store.attach_named::<dyn Store>("slow", Arc::new(Disk));

        assert_eq!(store.get_named::<dyn Store>("fast").unwrap().name(), "memory");
        assert_eq!(store.get_named::<dyn Store>("slow").unwrap().name(), "disk");
        assert!(store.exists_named("fast"));
        assert!(!store.exists_named("other"));
    }

    #[test]
    fn test_named_wrong_type_resolves_none() {
        let store = Attachments::new();
        store.attach_named("session", Arc::new(Session { id: 3 }));

        assert!(store.get_named::<dyn Store>("session").is_none());
        assert_eq!(store.get_named::<Session>("session").unwrap().id, 3);
    }

    #[test]
    fn test_named_replaces_previous() {
        let store = Attachments::new();
        store.attach_named("session", Arc::new(Session { id: 1 }));
        store.attach_named("session", Arc::new(Session { id: 2 }));

        assert_eq!(store.get_named::<Session>("session").unwrap().id, 2);
    }

    #[test]
    fn test_type_and_named_keys_are_separate() {
        let store = Attachments::new();
        store.attach(Arc::new(Session { id: 1 })).unwrap();
        store.attach_named("Session", Arc::new(Session { id: 2 }));

        assert_eq!(store.get::<Session>().unwrap().id, 1);
        assert_eq!(store.get_named::<Session>("Session").unwrap().id, 2);
    }

    #[test]
    fn test_attach_trait_object_by_type() {
        let store = Attachments::new();
        store.attach::<dyn Store>(Arc::new(Memory)).unwrap();

        assert_eq!(store.get::<dyn Store>().unwrap().name(), "memory");
        assert!(store.attach::<dyn Store>(Arc::new(Disk)).is_err());
    }
}
