//! # Object Registry
//!
//! Maps dotted object paths rooted at `Application` to exposed objects and
//! their meta-access flag. The registry is constructed by the embedding
//! application and shared with servers by `Arc`.

use std::sync::Arc;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry as Slot;

use crate::object::ExposedObject;

/// The first segment of every object path.
pub const ROOT: &str = "Application";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The path is empty, has empty segments, or is not rooted at `Application`.
    InvalidPath(String),
    AlreadyRegistered(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidPath(path) => write!(f, "Invalid object path '{}'", path),
            Self::AlreadyRegistered(path) => write!(f, "Object '{}' is already registered", path),
        }
    }
}

impl std::error::Error for Error {}

pub type Result<T> = std::result::Result<T, Error>;

/// Path resolution as seen by the dispatcher.
pub trait Resolve: Send + Sync + 'static {
    /// Returns the object and whether meta access is permitted.
    fn resolve(&self, path: &str) -> Option<(Arc<ExposedObject>, bool)>;
}

struct Entry {
    object: Arc<ExposedObject>,
    allow_meta_access: bool,
}

/// A concurrent path table.
#[derive(Default)]
pub struct Registry {
    objects: DashMap<String, Entry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        path: &str,
        object: Arc<ExposedObject>,
        allow_meta_access: bool,
    ) -> Result<()> {
        validate_path(path)?;
        match self.objects.entry(path.to_owned()) {
            Slot::Occupied(_) => Err(Error::AlreadyRegistered(path.to_owned())),
            Slot::Vacant(slot) => {
                slot.insert(Entry { object, allow_meta_access });
                Ok(())
            }
        }
    }

    pub fn unregister(&self, path: &str) -> Option<Arc<ExposedObject>> {
        self.objects.remove(path).map(|(_, entry)| entry.object)
    }

    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        paths.sort();
        paths
    }
}

impl Resolve for Registry {
    fn resolve(&self, path: &str) -> Option<(Arc<ExposedObject>, bool)> {
        self.objects
            .get(path)
            .map(|entry| (entry.object.clone(), entry.allow_meta_access))
    }
}

fn validate_path(path: &str) -> Result<()> {
    let mut segments = path.split('.');
    if segments.next() != Some(ROOT) || path.split('.').any(str::is_empty) {
        return Err(Error::InvalidPath(path.to_owned()));
    }
    Ok(())
}
