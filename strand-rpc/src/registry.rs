//! Method registry: the bidirectional `name <-> id` map shared through the
//! handshake.
//!
//! The server populates its registry at startup while binding methods; a
//! client populates its copy exactly once, from the server's snapshot, when
//! the handshake completes. Every lookup after that is a read.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// One registered method, as exchanged in the handshake.
///
/// `in_type` and `out_type` are opaque type descriptors produced by the
/// codec layer; they are compared for equality and never interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MethodInfo {
    pub id: u32,
    pub name: String,
    pub in_type: String,
    pub out_type: String,
}

/// Error type for registry operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// A method with this name is already registered.
    DuplicateMethod(String),
    /// No method with this name.
    NameNotFound(String),
    /// No method with this id.
    IdNotFound(u32),
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::DuplicateMethod(name) => write!(f, "duplicate method name: {name}"),
            RegistryError::NameNotFound(name) => write!(f, "method not found: {name}"),
            RegistryError::IdNotFound(id) => write!(f, "method id not found: {id}"),
        }
    }
}

impl std::error::Error for RegistryError {}

#[derive(Default)]
struct Indices {
    /// Highest id handed out or imported so far; fresh ids continue above it.
    last_id: u32,
    by_name: HashMap<String, Arc<MethodInfo>>,
    by_id: HashMap<u32, Arc<MethodInfo>>,
}

/// Set of methods indexed by both name and id.
///
/// Read-heavy: mutation only happens during server registration and at
/// client handshake, so a single reader-writer lock covers both indices.
#[derive(Default)]
pub struct MethodRegistry {
    inner: RwLock<Indices>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one method under a freshly allocated id (ids start at 1).
    pub fn add(&self, name: &str, in_type: &str, out_type: &str) -> Result<u32, RegistryError> {
        let mut inner = self.inner.write();
        if inner.by_name.contains_key(name) {
            return Err(RegistryError::DuplicateMethod(name.to_string()));
        }

        inner.last_id += 1;
        let id = inner.last_id;
        let info = Arc::new(MethodInfo {
            id,
            name: name.to_string(),
            in_type: in_type.to_string(),
            out_type: out_type.to_string(),
        });
        inner.by_name.insert(info.name.clone(), info.clone());
        inner.by_id.insert(id, info);
        Ok(id)
    }

    /// Import a batch of methods with their ids, transactionally: any name
    /// collision fails the whole batch with no partial state.
    pub fn batch_add(&self, methods: Vec<MethodInfo>) -> Result<(), RegistryError> {
        let mut inner = self.inner.write();
        for m in &methods {
            if inner.by_name.contains_key(&m.name) {
                return Err(RegistryError::DuplicateMethod(m.name.clone()));
            }
        }
        for m in methods {
            inner.last_id = inner.last_id.max(m.id);
            let info = Arc::new(m);
            inner.by_name.insert(info.name.clone(), info.clone());
            inner.by_id.insert(info.id, info);
        }
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> Result<MethodInfo, RegistryError> {
        self.inner
            .read()
            .by_name
            .get(name)
            .map(|m| (**m).clone())
            .ok_or_else(|| RegistryError::NameNotFound(name.to_string()))
    }

    pub fn get_by_id(&self, id: u32) -> Result<MethodInfo, RegistryError> {
        self.inner
            .read()
            .by_id
            .get(&id)
            .map(|m| (**m).clone())
            .ok_or(RegistryError::IdNotFound(id))
    }

    /// All methods, ordered by id.
    pub fn snapshot(&self) -> Vec<MethodInfo> {
        let inner = self.inner.read();
        let mut methods: Vec<MethodInfo> = inner.by_id.values().map(|m| (**m).clone()).collect();
        methods.sort_by_key(|m| m.id);
        methods
    }

    pub fn len(&self) -> usize {
        self.inner.read().by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for MethodRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MethodRegistry")
            .field("methods", &self.len())
            .finish()
    }
}
