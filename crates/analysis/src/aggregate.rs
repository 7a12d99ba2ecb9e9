//! Pure aggregation over analyzed photos.

use inspecta_core::inspection::PENDING_CLASSIFICATION;
use inspecta_core::{Condition, Inspection, SpaceGroup};

/// Percentage to report after analyzing photo `index` (0-based) of `total`.
///
/// The first 10% is reserved for setup and the last 10% for finalization,
/// so per-photo progress sweeps 10..=90.
pub fn unit_progress(index: usize, total: usize) -> u8 {
    if total == 0 {
        return 90;
    }
    let fraction = (index + 1) as f64 / total as f64;
    ((fraction * 80.0).round() as u8).saturating_add(10).min(90)
}

/// Counts reported as the job result summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize)]
pub struct AnalysisTotals {
    pub photos_processed: u32,
    pub space_groups: u32,
    pub issues_found: u32,
}

impl AnalysisTotals {
    pub fn of(inspection: &Inspection, photos_processed: u32) -> Self {
        Self {
            photos_processed,
            space_groups: inspection.space_groups.len() as u32,
            issues_found: inspection
                .photos()
                .map(|p| p.issues.len() as u32)
                .sum(),
        }
    }
}

/// Recompute a group's aggregate condition, actions list, and summary from
/// its photos.
///
/// The aggregate condition is the severity-score average of the photos'
/// conditions rounded to the nearest named level. High-severity issue
/// recommendations become the actions list (deduplicated, photo order).
pub fn summarize_group(group: &mut SpaceGroup) {
    group.condition = Condition::aggregate(group.photos.iter().map(|p| &p.condition));

    group.actions.clear();
    for photo in &group.photos {
        for issue in &photo.issues {
            if issue.severity.is_high() && !group.actions.contains(&issue.recommendation) {
                group.actions.push(issue.recommendation.clone());
            }
        }
    }

    let issue_count: usize = group.photos.iter().map(|p| p.issues.len()).sum();
    group.summary = Some(format!(
        "{} photo{} assessed; condition {}; {} issue{} found{}",
        group.photos.len(),
        if group.photos.len() == 1 { "" } else { "s" },
        group.condition,
        issue_count,
        if issue_count == 1 { "" } else { "s" },
        if group.actions.is_empty() {
            String::new()
        } else {
            format!(", {} requiring action", group.actions.len())
        },
    ));
}

/// Move classified photos out of the pending-classification holding group
/// into their resolved groups, creating groups as needed and keeping the
/// existing ordering keys stable. Discards the holding group once empty.
///
/// Returns the number of photos moved.
pub fn migrate_pending_photos(inspection: &mut Inspection) -> usize {
    let Some(holding) = inspection.group_mut(PENDING_CLASSIFICATION) else {
        return 0;
    };

    let (classified, unclassified): (Vec<_>, Vec<_>) = holding
        .photos
        .drain(..)
        .partition(|p| p.space.is_some());
    holding.photos = unclassified;

    let moved = classified.len();
    for photo in classified {
        let space = photo.space.clone().expect("partitioned on space presence");
        inspection.ensure_group(&space).photos.push(photo);
    }

    inspection.discard_group_if_empty(PENDING_CLASSIFICATION);
    moved
}

#[cfg(test)]
mod tests {
    use super::*;
    use inspecta_core::{Issue, IssueSeverity, Photo, PhotoId, TenantId};

    #[test]
    fn unit_progress_sweeps_ten_to_ninety() {
        // total = 3: round(1/3*80)+10, round(2/3*80)+10, round(3/3*80)+10
        assert_eq!(unit_progress(0, 3), 37);
        assert_eq!(unit_progress(1, 3), 63);
        assert_eq!(unit_progress(2, 3), 90);

        assert_eq!(unit_progress(0, 1), 90);
        assert_eq!(unit_progress(0, 10), 18);
        assert_eq!(unit_progress(9, 10), 90);
    }

    #[test]
    fn unit_progress_is_monotonic() {
        for total in 1..=20usize {
            let mut last = 0;
            for i in 0..total {
                let p = unit_progress(i, total);
                assert!(p >= last, "regressed at {i}/{total}");
                last = p;
            }
            assert_eq!(last, 90);
        }
    }

    fn photo_in(space: &str, condition: Condition) -> Photo {
        Photo {
            id: PhotoId::new(),
            space: Some(space.to_string()),
            condition,
            issues: Vec::new(),
        }
    }

    #[test]
    fn summarize_group_averages_conditions() {
        let mut group = SpaceGroup::new("Kitchen", 0);
        group.photos.push(photo_in("Kitchen", Condition::Excellent));
        group.photos.push(photo_in("Kitchen", Condition::Fair));

        summarize_group(&mut group);

        // (5 + 3) / 2 = 4 -> good
        assert_eq!(group.condition, Condition::Good);
        assert!(group.summary.as_deref().unwrap().contains("condition good"));
    }

    #[test]
    fn high_severity_recommendations_become_actions() {
        let mut group = SpaceGroup::new("Bathroom", 0);
        let mut photo = photo_in("Bathroom", Condition::Poor);
        photo.issues.push(Issue {
            severity: IssueSeverity::Critical,
            title: "Active leak under sink".to_string(),
            recommendation: "Engage a plumber".to_string(),
        });
        photo.issues.push(Issue {
            severity: IssueSeverity::Low,
            title: "Scuffed paint".to_string(),
            recommendation: "Repaint at turnover".to_string(),
        });
        group.photos.push(photo);

        summarize_group(&mut group);

        assert_eq!(group.actions, vec!["Engage a plumber".to_string()]);
    }

    #[test]
    fn migrate_creates_one_group_for_shared_new_space() {
        let mut inspection = Inspection::new(TenantId::new(), "test");
        let holding = inspection.ensure_group(PENDING_CLASSIFICATION);
        holding.photos.push(photo_in("Garage", Condition::Good));
        holding.photos.push(photo_in("Garage", Condition::Poor));

        let moved = migrate_pending_photos(&mut inspection);

        assert_eq!(moved, 2);
        assert!(inspection.group(PENDING_CLASSIFICATION).is_none());
        let garage = inspection.group("Garage").expect("garage group created");
        assert_eq!(garage.photos.len(), 2);

        let mut garage = garage.clone();
        summarize_group(&mut garage);
        // (4 + 2) / 2 = 3 -> fair: the rounded average of the two photos.
        assert_eq!(garage.condition, Condition::Fair);
    }

    #[test]
    fn migrate_leaves_unclassified_photos_behind() {
        let mut inspection = Inspection::new(TenantId::new(), "test");
        let holding = inspection.ensure_group(PENDING_CLASSIFICATION);
        holding.photos.push(photo_in("Kitchen", Condition::Good));
        holding.photos.push(Photo::unclassified(PhotoId::new()));

        let moved = migrate_pending_photos(&mut inspection);

        assert_eq!(moved, 1);
        let holding = inspection.group(PENDING_CLASSIFICATION).unwrap();
        assert_eq!(holding.photos.len(), 1);
    }
}
