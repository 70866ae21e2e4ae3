//! Diff computation between two templates

use crate::types::{Template, TemplateResource};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// How a resource changed between two templates
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Change {
    /// Present only in the new template
    Added,
    /// Present only in the old template
    Removed,
    /// Same type, different properties or attributes
    Modified { properties: Vec<String> },
    /// Same logical id, different resource type
    Replaced { from_type: String },
}

/// A diff of one resource between an old and a new template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceDiff {
    /// Logical id of the resource
    pub logical_id: String,
    /// Type of the resource (new type for replacements)
    pub resource_type: String,
    /// What changed
    pub change: Change,
}

impl ResourceDiff {
    pub fn is_addition(&self) -> bool {
        matches!(self.change, Change::Added)
    }

    pub fn is_removal(&self) -> bool {
        matches!(self.change, Change::Removed)
    }

    pub fn is_modification(&self) -> bool {
        matches!(self.change, Change::Modified { .. })
    }

    pub fn is_replacement(&self) -> bool {
        matches!(self.change, Change::Replaced { .. })
    }
}

/// Compare a resource's two versions, returning the changed attribute names
fn changed_attributes(old: &TemplateResource, new: &TemplateResource) -> Vec<String> {
    let keys: BTreeSet<&String> = old.properties.keys().chain(new.properties.keys()).collect();
    let mut changed: Vec<String> = keys
        .into_iter()
        .filter(|k| old.properties.get(*k) != new.properties.get(*k))
        .cloned()
        .collect();
    if old.depends_on != new.depends_on {
        changed.push("DependsOn".to_string());
    }
    if old.deletion_policy != new.deletion_policy {
        changed.push("DeletionPolicy".to_string());
    }
    if old.update_replace_policy != new.update_replace_policy {
        changed.push("UpdateReplacePolicy".to_string());
    }
    changed
}

/// Compute resource diffs going from `old` to `new`
///
/// Additions and modifications come in the new template's order, followed by
/// removals in the old template's order. Unchanged resources are omitted.
pub fn compute_diffs(old: &Template, new: &Template) -> Vec<ResourceDiff> {
    let old_by_id: HashMap<&str, &TemplateResource> = old
        .resources
        .iter()
        .map(|(id, r)| (id.as_str(), r))
        .collect();
    let new_ids: BTreeSet<&str> = new.resources.iter().map(|(id, _)| id.as_str()).collect();

    let mut diffs = Vec::new();
    for (id, resource) in &new.resources {
        let change = match old_by_id.get(id.as_str()) {
            None => Some(Change::Added),
            Some(prev) if prev.resource_type != resource.resource_type => Some(Change::Replaced {
                from_type: prev.resource_type.clone(),
            }),
            Some(prev) => {
                let properties = changed_attributes(prev, resource);
                (!properties.is_empty()).then_some(Change::Modified { properties })
            }
        };
        if let Some(change) = change {
            diffs.push(ResourceDiff {
                logical_id: id.clone(),
                resource_type: resource.resource_type.clone(),
                change,
            });
        }
    }

    for (id, resource) in &old.resources {
        if !new_ids.contains(id.as_str()) {
            diffs.push(ResourceDiff {
                logical_id: id.clone(),
                resource_type: resource.resource_type.clone(),
                change: Change::Removed,
            });
        }
    }

    diffs
}

/// Diff summary statistics
#[derive(Debug, Clone, Default)]
pub struct DiffSummary {
    /// Number of resources to add
    pub additions: usize,
    /// Number of resources to remove
    pub removals: usize,
    /// Number of resources to modify in place
    pub modifications: usize,
    /// Number of resources whose type changed
    pub replacements: usize,
}

impl DiffSummary {
    /// Create a summary from a list of diffs
    pub fn from_diffs(diffs: &[ResourceDiff]) -> Self {
        let mut summary = Self::default();
        for diff in diffs {
            match diff.change {
                Change::Added => summary.additions += 1,
                Change::Removed => summary.removals += 1,
                Change::Modified { .. } => summary.modifications += 1,
                Change::Replaced { .. } => summary.replacements += 1,
            }
        }
        summary
    }

    /// Total number of changes
    pub fn total(&self) -> usize {
        self.additions + self.removals + self.modifications + self.replacements
    }

    /// Check if there are any changes
    pub fn has_changes(&self) -> bool {
        self.total() > 0
    }
}

/// Group diffs by resource type
pub fn group_by_type(
    diffs: &[ResourceDiff],
) -> std::collections::BTreeMap<String, Vec<&ResourceDiff>> {
    let mut groups: std::collections::BTreeMap<String, Vec<&ResourceDiff>> =
        std::collections::BTreeMap::new();
    for diff in diffs {
        groups
            .entry(diff.resource_type.clone())
            .or_default()
            .push(diff);
    }
    groups
}
