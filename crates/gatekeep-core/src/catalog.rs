//! The permission catalog: an arena of permissions indexed by id and by
//! canonical name.
//!
//! Hierarchy is expressed through `parent_permission_id` only. Cycle
//! prevention is a reachability walk over ids.

use std::collections::{HashMap, HashSet};

use uuid::Uuid;

use crate::models::permission::Permission;

#[derive(Debug, Clone, Default)]
pub struct Catalog {
    permissions: HashMap<Uuid, Permission>,
    by_name: HashMap<String, Uuid>,
}

impl Catalog {
    pub fn new(permissions: impl IntoIterator<Item = Permission>) -> Self {
        let mut catalog = Self::default();
        for permission in permissions {
            catalog.by_name.insert(permission.name(), permission.id);
            catalog.permissions.insert(permission.id, permission);
        }
        catalog
    }

    pub fn len(&self) -> usize {
        self.permissions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.permissions.is_empty()
    }

    pub fn get(&self, id: Uuid) -> Option<&Permission> {
        self.permissions.get(&id)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&Permission> {
        self.by_name.get(name).and_then(|id| self.permissions.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Permission> {
        self.permissions.values()
    }

    /// Direct children, sorted by name.
    pub fn children(&self, id: Uuid) -> Vec<&Permission> {
        let mut children: Vec<&Permission> = self
            .permissions
            .values()
            .filter(|p| p.parent_permission_id == Some(id))
            .collect();
        children.sort_by_key(|p| p.name());
        children
    }

    /// Parent chain of `id`, nearest first. Stops at a missing parent or a
    /// repeated id.
    pub fn ancestors(&self, id: Uuid) -> Vec<Uuid> {
        let mut chain = Vec::new();
        let mut seen = HashSet::from([id]);
        let mut current = self.get(id).and_then(|p| p.parent_permission_id);
        while let Some(parent) = current {
            if !seen.insert(parent) {
                break;
            }
            chain.push(parent);
            current = self.get(parent).and_then(|p| p.parent_permission_id);
        }
        chain
    }

    /// Whether `candidate` lies below `ancestor` in the hierarchy.
    pub fn is_descendant(&self, candidate: Uuid, ancestor: Uuid) -> bool {
        self.ancestors(candidate).contains(&ancestor)
    }

    /// A permission may not be its own parent, and may not take one of its
    /// descendants as parent.
    pub fn can_have_parent(&self, permission_id: Uuid, candidate_parent_id: Uuid) -> bool {
        permission_id != candidate_parent_id
            && !self.is_descendant(candidate_parent_id, permission_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::status::EntityStatus;
    use chrono::Utc;

    fn perm(resource: &str, action: &str, parent: Option<Uuid>) -> Permission {
        Permission {
            id: Uuid::new_v4(),
            resource: resource.into(),
            action: action.into(),
            description: String::new(),
            category: None,
            status: EntityStatus::Active,
            parent_permission_id: parent,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn indexes_by_name() {
        let read = perm("Docs", "Read", None);
        let catalog = Catalog::new([read.clone()]);
        assert_eq!(catalog.get_by_name("Docs.Read").map(|p| p.id), Some(read.id));
        assert!(catalog.get_by_name("Docs.Write").is_none());
        assert_eq!(catalog.len(), 1);
    }

    #[test]
    fn rejects_self_and_descendants_as_parent() {
        let root = perm("Docs", "Manage", None);
        let child = perm("Docs", "Write", Some(root.id));
        let grandchild = perm("Docs", "Comment", Some(child.id));
        let other = perm("Billing", "View", None);
        let catalog = Catalog::new([
            root.clone(),
            child.clone(),
            grandchild.clone(),
            other.clone(),
        ]);

        assert!(!catalog.can_have_parent(root.id, root.id));
        assert!(!catalog.can_have_parent(root.id, child.id));
        assert!(!catalog.can_have_parent(root.id, grandchild.id));
        assert!(catalog.can_have_parent(grandchild.id, root.id));
        assert!(catalog.can_have_parent(root.id, other.id));
        assert!(catalog.can_have_parent(other.id, grandchild.id));
    }

    #[test]
    fn ancestors_terminate_on_existing_cycle() {
        let mut a = perm("A", "x", None);
        let mut b = perm("B", "x", None);
        a.parent_permission_id = Some(b.id);
        b.parent_permission_id = Some(a.id);
        let catalog = Catalog::new([a.clone(), b.clone()]);

        assert_eq!(catalog.ancestors(a.id), vec![b.id]);
        assert!(!catalog.can_have_parent(a.id, b.id));
    }

    #[test]
    fn children_are_sorted() {
        let root = perm("Docs", "Manage", None);
        let w = perm("Docs", "Write", Some(root.id));
        let c = perm("Docs", "Comment", Some(root.id));
        let catalog = Catalog::new([root.clone(), w, c]);
        let names: Vec<String> = catalog.children(root.id).iter().map(|p| p.name()).collect();
        assert_eq!(names, ["Docs.Comment", "Docs.Write"]);
    }
}
