//! String-keyed state shared by independently registered modules.

use std::any::Any;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use hostbind_core::TypeHash;

type SharedValue = Arc<dyn Any + Send + Sync>;

/// Process-wide key/value store, keyed by token hash.
#[derive(Default)]
pub struct SharedData {
    values: FxHashMap<TypeHash, SharedValue>,
}

impl SharedData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value stored under `token`, if it has type `T`.
    pub fn get<T: Any + Send + Sync>(&self, token: &str) -> Option<Arc<T>> {
        self.values
            .get(&TypeHash::from_token(token))
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Store `value` under `token`, returning the previous value.
    pub fn set<T: Any + Send + Sync>(&mut self, token: &str, value: T) -> Option<SharedValue> {
        self.values
            .insert(TypeHash::from_token(token), Arc::new(value))
    }

    /// Get the value under `token`, storing `init()` first if absent.
    pub fn get_or_insert_with<T, F>(&mut self, token: &str, init: F) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
        F: FnOnce() -> T,
    {
        self.values
            .entry(TypeHash::from_token(token))
            .or_insert_with(|| Arc::new(init()))
            .clone()
            .downcast::<T>()
            .ok()
    }

    pub fn contains(&self, token: &str) -> bool {
        self.values.contains_key(&TypeHash::from_token(token))
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}
