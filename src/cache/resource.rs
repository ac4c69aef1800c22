use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::document::ApiError;

type Attributes = Map<String, Value>;

/// Per-resource attribute state.
///
/// Reads go local > inflight > remote. `will_commit` freezes local edits into `inflight_attrs`;
/// a successful commit folds them into `remote_attrs` and a rejected one hands them back to
/// `local_attrs`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CachedResource {
    pub id: Option<String>,
    pub remote_attrs: Option<Attributes>,
    pub local_attrs: Option<Attributes>,
    pub inflight_attrs: Option<Attributes>,
    /// attribute -> (committed value, current value)
    pub changes: BTreeMap<String, (Value, Value)>,
    pub errors: Option<Vec<ApiError>>,
    pub is_new: bool,
    pub is_deleted: bool,
    pub is_deletion_committed: bool,
}

impl CachedResource {
    pub fn new() -> Self {
        CachedResource::default()
    }

    /// No attribute data has been received or set in any tier.
    pub fn is_empty(&self) -> bool {
        self.remote_attrs.is_none() && self.inflight_attrs.is_none() && self.local_attrs.is_none()
    }

    pub fn attr(&self, key: &str) -> Option<&Value> {
        self.local_attrs
            .as_ref()
            .and_then(|attrs| attrs.get(key))
            .or_else(|| self.committed(key))
    }

    /// The value the server has or is being sent: inflight, then remote.
    fn committed(&self, key: &str) -> Option<&Value> {
        match self.inflight_attrs.as_ref().filter(|a| a.contains_key(key)) {
            Some(inflight) => inflight.get(key),
            None => self.remote_attrs.as_ref().and_then(|attrs| attrs.get(key)),
        }
    }

    fn has_local(&self, key: &str) -> bool {
        self.local_attrs
            .as_ref()
            .is_some_and(|attrs| attrs.contains_key(key))
    }

    pub fn has_changed_attrs(&self) -> bool {
        self.inflight_attrs.as_ref().is_some_and(|a| !a.is_empty())
            || self.local_attrs.as_ref().is_some_and(|a| !a.is_empty())
    }

    /// Record a local edit. An edit back to the committed value clears the edit instead.
    pub(crate) fn set_local(&mut self, key: &str, value: Value) {
        if self.committed(key) == Some(&value) {
            if let Some(local) = self.local_attrs.as_mut() {
                local.remove(key);
            }
        } else {
            self.local_attrs
                .get_or_insert_with(Map::new)
                .insert(key.to_string(), value);
        }
        self.refresh_changes();
    }

    /// Drop local edits that agree with the committed value.
    pub(crate) fn patch_local_attrs(&mut self) {
        let Some(local) = self.local_attrs.take() else {
            return;
        };
        let patched: Attributes = local
            .into_iter()
            .filter(|(key, value)| self.committed(key) != Some(value))
            .collect();
        self.local_attrs = Some(patched);
    }

    pub(crate) fn refresh_changes(&mut self) {
        let mut changes = BTreeMap::new();
        let keys = self
            .inflight_attrs
            .iter()
            .chain(self.local_attrs.iter())
            .flat_map(|attrs| attrs.keys());
        for key in keys {
            let old = self
                .remote_attrs
                .as_ref()
                .and_then(|attrs| attrs.get(key))
                .cloned()
                .unwrap_or(Value::Null);
            let Some(new) = self.attr(key) else {
                continue;
            };
            if *new != old {
                changes.insert(key.clone(), (old, new.clone()));
            }
        }
        self.changes = changes;
    }

    /// Keys of `attrs` whose value differs from the committed value. Keys with a local edit are
    /// not observable and are skipped.
    fn changed_keys(&self, attrs: &Attributes) -> Vec<String> {
        attrs
            .iter()
            .filter(|(key, _)| !self.has_local(key))
            .filter(|(key, value)| self.committed(key) != Some(*value))
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Merge server attributes into the remote tier, returning the keys whose visible value
    /// changed when `calculate_changes` is set.
    pub(crate) fn merge_remote(&mut self, attrs: &Attributes, calculate_changes: bool) -> Vec<String> {
        let changed = if calculate_changes {
            self.changed_keys(attrs)
        } else {
            Vec::new()
        };
        let remote = self.remote_attrs.get_or_insert_with(Map::new);
        for (key, value) in attrs {
            remote.insert(key.clone(), value.clone());
        }
        self.patch_local_attrs();
        self.refresh_changes();
        changed
    }

    pub(crate) fn freeze_inflight(&mut self) {
        let Some(local) = self.local_attrs.take() else {
            return;
        };
        self.inflight_attrs.get_or_insert_with(Map::new).extend(local);
    }

    /// Fold the inflight tier and any server confirmed `attrs` into the remote tier.
    pub(crate) fn commit_inflight(
        &mut self,
        attrs: Option<&Attributes>,
        calculate_changes: bool,
    ) -> Vec<String> {
        let inflight = self.inflight_attrs.take();
        let remote = self.remote_attrs.get_or_insert_with(Map::new);
        if let Some(inflight) = inflight {
            remote.extend(inflight);
        }
        match attrs {
            Some(attrs) => self.merge_remote(attrs, calculate_changes),
            None => {
                self.patch_local_attrs();
                self.refresh_changes();
                Vec::new()
            }
        }
    }

    /// Hand inflight edits back to the local tier. Keys edited again since `freeze_inflight` keep
    /// their newer value.
    pub(crate) fn unfreeze_inflight(&mut self) {
        if let Some(mut inflight) = self.inflight_attrs.take() {
            if let Some(local) = self.local_attrs.take() {
                inflight.extend(local);
            }
            self.local_attrs = Some(inflight);
        }
        self.refresh_changes();
    }

    /// Discard local and inflight edits, returning the keys that had local edits.
    pub(crate) fn rollback(&mut self) -> Vec<String> {
        let dirty: Vec<String> = self
            .local_attrs
            .take()
            .map(|local| local.into_iter().map(|(key, _)| key).collect())
            .unwrap_or_default();
        self.inflight_attrs = None;
        self.changes.clear();
        dirty
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn attrs(value: Value) -> Attributes {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_three_tier_read() {
        let mut resource = CachedResource::new();
        assert!(resource.is_empty());
        resource.merge_remote(&attrs(json!({"title": "remote"})), false);
        assert_eq!(resource.attr("title"), Some(&json!("remote")));

        resource.set_local("title", json!("draft"));
        resource.freeze_inflight();
        assert_eq!(resource.attr("title"), Some(&json!("draft")));

        resource.set_local("title", json!("newer"));
        assert_eq!(resource.attr("title"), Some(&json!("newer")));
        assert_eq!(
            resource.changes.get("title"),
            Some(&(json!("remote"), json!("newer")))
        );
    }

    #[test]
    fn test_edit_back_to_committed_value_is_clean() {
        let mut resource = CachedResource::new();
        resource.merge_remote(&attrs(json!({"title": "a"})), false);
        resource.set_local("title", json!("b"));
        assert!(resource.has_changed_attrs());
        resource.set_local("title", json!("a"));
        assert!(!resource.has_changed_attrs());
        assert!(resource.changes.is_empty());
    }

    #[test]
    fn test_remote_changes_skip_locally_edited_keys() {
        let mut resource = CachedResource::new();
        resource.merge_remote(&attrs(json!({"title": "a", "body": "x"})), false);
        resource.set_local("title", json!("mine"));
        let changed = resource.merge_remote(&attrs(json!({"title": "b", "body": "y"})), true);
        assert_eq!(changed, vec!["body".to_string()]);
        assert_eq!(resource.attr("title"), Some(&json!("mine")));
    }

    #[test]
    fn test_remote_catching_up_patches_local_edit() {
        let mut resource = CachedResource::new();
        resource.merge_remote(&attrs(json!({"title": "a"})), false);
        resource.set_local("title", json!("b"));
        resource.merge_remote(&attrs(json!({"title": "b"})), true);
        assert!(!resource.has_changed_attrs());
    }

    #[test]
    fn test_rejected_commit_keeps_newer_local_edit() {
        let mut resource = CachedResource::new();
        resource.set_local("title", json!("first"));
        resource.set_local("body", json!("text"));
        resource.freeze_inflight();
        resource.set_local("title", json!("second"));
        resource.unfreeze_inflight();

        assert!(resource.inflight_attrs.is_none());
        assert_eq!(resource.attr("title"), Some(&json!("second")));
        assert_eq!(resource.attr("body"), Some(&json!("text")));
    }
}
