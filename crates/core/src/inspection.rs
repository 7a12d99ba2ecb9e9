//! Inspection, photo, and space-group domain model.
//!
//! An [`Inspection`] owns an ordered set of [`SpaceGroup`]s. Photos awaiting
//! auto-classification sit in the transient [`PENDING_CLASSIFICATION`]
//! holding group until an analysis job resolves their space and moves them
//! into a real group.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::condition::Condition;
use crate::id::{InspectionId, PhotoId, TenantId};

/// Name of the holding group for photos that have not been classified yet.
pub const PENDING_CLASSIFICATION: &str = "Pending Classification";

/// Severity of a detected issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl IssueSeverity {
    /// High-severity issues feed the recommended-actions list.
    pub fn is_high(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

/// A single issue detected on a photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: IssueSeverity,
    pub title: String,
    pub recommendation: String,
}

/// One analyzed (or pending) inspection photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Photo {
    pub id: PhotoId,
    /// Resolved space name; `None` until classified.
    pub space: Option<String>,
    #[serde(default)]
    pub condition: Condition,
    #[serde(default)]
    pub issues: Vec<Issue>,
}

impl Photo {
    pub fn unclassified(id: PhotoId) -> Self {
        Self {
            id,
            space: None,
            condition: Condition::Unrated,
            issues: Vec::new(),
        }
    }
}

/// A named grouping of photos sharing a classified location type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpaceGroup {
    pub name: String,
    /// Stable ordering key; new groups append after existing ones.
    pub position: u32,
    #[serde(default)]
    pub condition: Condition,
    pub summary: Option<String>,
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub photos: Vec<Photo>,
}

impl SpaceGroup {
    pub fn new(name: impl Into<String>, position: u32) -> Self {
        Self {
            name: name.into(),
            position,
            condition: Condition::Unrated,
            summary: None,
            actions: Vec::new(),
            photos: Vec::new(),
        }
    }
}

/// The entity that owns analysis jobs and their photos.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Inspection {
    pub id: InspectionId,
    pub organization_id: TenantId,
    pub title: String,
    pub space_groups: Vec<SpaceGroup>,
    pub updated_at: DateTime<Utc>,
}

impl Inspection {
    pub fn new(organization_id: TenantId, title: impl Into<String>) -> Self {
        Self {
            id: InspectionId::new(),
            organization_id,
            title: title.into(),
            space_groups: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    pub fn group(&self, name: &str) -> Option<&SpaceGroup> {
        self.space_groups.iter().find(|g| g.name == name)
    }

    pub fn group_mut(&mut self, name: &str) -> Option<&mut SpaceGroup> {
        self.space_groups.iter_mut().find(|g| g.name == name)
    }

    /// Get or create the named group, appending after the current last
    /// position so ordering stays stable across re-analysis runs.
    pub fn ensure_group(&mut self, name: &str) -> &mut SpaceGroup {
        if let Some(idx) = self.space_groups.iter().position(|g| g.name == name) {
            return &mut self.space_groups[idx];
        }
        let position = self
            .space_groups
            .iter()
            .map(|g| g.position + 1)
            .max()
            .unwrap_or(0);
        self.space_groups.push(SpaceGroup::new(name, position));
        self.space_groups.last_mut().expect("group just pushed")
    }

    /// Drop the named group if it holds no photos. Returns whether it was
    /// removed.
    pub fn discard_group_if_empty(&mut self, name: &str) -> bool {
        if let Some(idx) = self
            .space_groups
            .iter()
            .position(|g| g.name == name && g.photos.is_empty())
        {
            self.space_groups.remove(idx);
            return true;
        }
        false
    }

    /// Iterate all photos across groups.
    pub fn photos(&self) -> impl Iterator<Item = &Photo> {
        self.space_groups.iter().flat_map(|g| g.photos.iter())
    }

    pub fn find_photo_mut(&mut self, id: PhotoId) -> Option<&mut Photo> {
        self.space_groups
            .iter_mut()
            .flat_map(|g| g.photos.iter_mut())
            .find(|p| p.id == id)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ensure_group_appends_with_stable_positions() {
        let mut inspection = Inspection::new(TenantId::new(), "Unit 4B move-out");
        inspection.ensure_group("Kitchen");
        inspection.ensure_group("Bathroom");
        // Re-asking for an existing group must not shift positions.
        inspection.ensure_group("Kitchen");

        let positions: Vec<(String, u32)> = inspection
            .space_groups
            .iter()
            .map(|g| (g.name.clone(), g.position))
            .collect();
        assert_eq!(
            positions,
            vec![("Kitchen".to_string(), 0), ("Bathroom".to_string(), 1)]
        );
    }

    #[test]
    fn discard_only_removes_empty_groups() {
        let mut inspection = Inspection::new(TenantId::new(), "test");
        inspection.ensure_group(PENDING_CLASSIFICATION);
        inspection
            .group_mut(PENDING_CLASSIFICATION)
            .unwrap()
            .photos
            .push(Photo::unclassified(PhotoId::new()));

        assert!(!inspection.discard_group_if_empty(PENDING_CLASSIFICATION));
        inspection
            .group_mut(PENDING_CLASSIFICATION)
            .unwrap()
            .photos
            .clear();
        assert!(inspection.discard_group_if_empty(PENDING_CLASSIFICATION));
        assert!(inspection.group(PENDING_CLASSIFICATION).is_none());
    }
}
