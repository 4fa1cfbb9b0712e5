//! Request-scoped context.
//!
//! A [`Context`] travels with each request through the interceptor chain down to the engine.
//! Serializable entries are keyed by name; values that are not serializable (principals,
//! captured ambient values...) go in the typed [`Context::extensions`].

use std::ops::Deref;
use std::ops::DerefMut;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tower::BoxError;

use crate::json_ext::Value;

/// Context key holding the `connection_init` payload of a WebSocket session.
pub const CONNECTION_INIT_PAYLOAD: &str = "graphql::websocket::connection_init_payload";

/// Holds request-scoped values.
///
/// Cloning a context shares its storage; use [`Context::snapshot`] for an independent copy.
#[derive(Clone, Default, Debug)]
pub struct Context {
    entries: Arc<DashMap<String, Value>>,
    extensions: ExtensionsMutex,
}

impl Context {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a serializable value, returning the previous one if any.
    pub fn insert<K, V>(&self, key: K, value: V) -> Result<Option<V>, BoxError>
    where
        K: Into<String>,
        V: Serialize + DeserializeOwned,
    {
        match serde_json_bytes::to_value(value) {
            Ok(value) => self
                .entries
                .insert(key.into(), value)
                .map(|previous| serde_json_bytes::from_value(previous))
                .transpose()
                .map_err(|err| err.into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Get a value, deserialized into `V`.
    pub fn get<K, V>(&self, key: K) -> Result<Option<V>, BoxError>
    where
        K: AsRef<str>,
        V: DeserializeOwned,
    {
        self.entries
            .get(key.as_ref())
            .map(|v| serde_json_bytes::from_value(v.value().clone()))
            .transpose()
            .map_err(|e| e.into())
    }

    pub fn contains_key<K: AsRef<str>>(&self, key: K) -> bool {
        self.entries.contains_key(key.as_ref())
    }

    pub fn remove<K: AsRef<str>>(&self, key: K) -> Option<Value> {
        self.entries.remove(key.as_ref()).map(|(_, value)| value)
    }

    /// Typed values that are not serializable.
    pub fn extensions(&self) -> &ExtensionsMutex {
        &self.extensions
    }

    /// An independent copy: entries and extensions are copied, later changes are not shared.
    pub fn snapshot(&self) -> Context {
        let entries = DashMap::with_capacity(self.entries.len());
        for entry in self.entries.iter() {
            entries.insert(entry.key().clone(), entry.value().clone());
        }
        let extensions = self.extensions.with_lock(|lock| lock.clone());
        Context {
            entries: Arc::new(entries),
            extensions: ExtensionsMutex {
                extensions: Arc::new(parking_lot::Mutex::new(extensions)),
            },
        }
    }
}

/// Thread safe access to [`http::Extensions`].
///
/// For example:
/// `context.extensions().with_lock(|mut lock| lock.insert::<MyData>(data));`
#[derive(Default, Clone, Debug)]
pub struct ExtensionsMutex {
    extensions: Arc<parking_lot::Mutex<http::Extensions>>,
}

impl ExtensionsMutex {
    /// Locks the extensions for interaction.
    ///
    /// The lock will be dropped once the closure completes.
    pub fn with_lock<'a, T, F: FnOnce(ExtensionsGuard<'a>) -> T>(&'a self, func: F) -> T {
        func(ExtensionsGuard {
            guard: self.extensions.lock(),
        })
    }
}

pub struct ExtensionsGuard<'a> {
    guard: parking_lot::MutexGuard<'a, http::Extensions>,
}

impl Deref for ExtensionsGuard<'_> {
    type Target = http::Extensions;

    fn deref(&self) -> &http::Extensions {
        &self.guard
    }
}

impl DerefMut for ExtensionsGuard<'_> {
    fn deref_mut(&mut self) -> &mut http::Extensions {
        &mut self.guard
    }
}
