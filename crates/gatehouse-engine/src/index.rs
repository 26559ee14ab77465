//! Arena-style catalog cache.
//!
//! Entries are keyed by their stable id; a secondary index maps names to ids
//! and keeps names unique.

use gatehouse_model::{AuthzError, AuthzResult, Permission, Resource};
use std::collections::HashMap;
use uuid::Uuid;

/// An entry with a stable id and a unique name.
pub trait Indexed: Clone {
    /// Stable id.
    fn id(&self) -> Uuid;
    /// Unique human-readable name.
    fn name(&self) -> &str;
}

impl Indexed for Resource {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Indexed for Permission {
    fn id(&self) -> Uuid {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Id-keyed arena with a unique name index.
#[derive(Debug, Clone)]
pub struct CatalogIndex<T> {
    entries: HashMap<Uuid, T>,
    by_name: HashMap<String, Uuid>,
}

impl<T> Default for CatalogIndex<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            by_name: HashMap::new(),
        }
    }
}

impl<T: Indexed> CatalogIndex<T> {
    /// Create an empty index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new entry. Fails with `Conflict` if another entry owns the name.
    pub fn insert(&mut self, entry: T) -> AuthzResult<()> {
        match self.by_name.get(entry.name()) {
            Some(id) if *id != entry.id() => {
                return Err(AuthzError::Conflict(format!(
                    "'{}' already exists",
                    entry.name()
                )))
            }
            _ => {}
        }
        self.upsert(entry);
        Ok(())
    }

    /// Insert or replace by id, re-pointing the name index.
    pub fn upsert(&mut self, entry: T) {
        if let Some(previous) = self.entries.get(&entry.id()) {
            if previous.name() != entry.name() {
                self.by_name.remove(previous.name());
            }
        }
        self.by_name.insert(entry.name().to_string(), entry.id());
        self.entries.insert(entry.id(), entry);
    }

    /// Look up by id.
    pub fn get(&self, id: &Uuid) -> Option<&T> {
        self.entries.get(id)
    }

    /// Look up by name.
    pub fn get_by_name(&self, name: &str) -> Option<&T> {
        self.by_name.get(name).and_then(|id| self.entries.get(id))
    }

    /// Check whether a name is taken.
    pub fn contains_name(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Remove by id.
    pub fn remove(&mut self, id: &Uuid) -> Option<T> {
        let entry = self.entries.remove(id)?;
        self.by_name.remove(entry.name());
        Some(entry)
    }

    /// Remove by name.
    pub fn remove_by_name(&mut self, name: &str) -> Option<T> {
        let id = self.by_name.get(name).copied()?;
        self.remove(&id)
    }

    /// Replace the whole content.
    pub fn replace_all(&mut self, entries: impl IntoIterator<Item = T>) {
        self.entries.clear();
        self.by_name.clear();
        for entry in entries {
            self.upsert(entry);
        }
    }

    /// Iterate over entries in no particular order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.values()
    }

    /// Entries sorted by name.
    pub fn sorted(&self) -> Vec<T> {
        let mut out: Vec<T> = self.entries.values().cloned().collect();
        out.sort_by(|a, b| a.name().cmp(b.name()));
        out
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gatehouse_model::PermissionName;

    fn permission(name: &str) -> Permission {
        Permission::new(&PermissionName::parse(name).unwrap(), name)
    }

    #[test]
    fn test_names_are_unique() {
        let mut index = CatalogIndex::new();
        index.insert(permission("documents:read")).unwrap();

        let err = index.insert(permission("documents:read")).unwrap_err();
        assert!(matches!(err, AuthzError::Conflict(_)));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_lookup_by_id_and_name() {
        let mut index = CatalogIndex::new();
        let p = permission("documents:read:own");
        let id = p.id;
        index.insert(p).unwrap();

        assert_eq!(index.get(&id).map(|p| p.name.as_str()), Some("documents:read:own"));
        assert_eq!(index.get_by_name("documents:read:own").map(|p| p.id), Some(id));
        assert!(index.get_by_name("documents:read").is_none());
    }

    #[test]
    fn test_upsert_same_id_replaces() {
        let mut index = CatalogIndex::new();
        let mut p = permission("documents:read");
        index.insert(p.clone()).unwrap();

        p.description = "changed".into();
        index.insert(p.clone()).unwrap();
        assert_eq!(index.len(), 1);
        assert_eq!(index.get(&p.id).unwrap().description, "changed");
    }

    #[test]
    fn test_remove_clears_name_index() {
        let mut index = CatalogIndex::new();
        let p = permission("documents:read");
        let id = p.id;
        index.insert(p).unwrap();

        assert!(index.remove(&id).is_some());
        assert!(!index.contains_name("documents:read"));
        assert!(index.remove_by_name("documents:read").is_none());
        assert!(index.is_empty());
    }

    #[test]
    fn test_replace_all_and_sorted() {
        let mut index = CatalogIndex::new();
        index.insert(permission("zeta:read")).unwrap();
        index.replace_all(vec![permission("beta:read"), permission("alpha:read")]);

        let names: Vec<String> = index.sorted().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["alpha:read", "beta:read"]);
        assert!(!index.contains_name("zeta:read"));
    }
}
