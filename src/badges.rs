//! Milestone badges awarded at referral-count thresholds.

use serde::{Deserialize, Serialize};

/// A static badge catalog entry.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Badge {
    /// The badge ID.
    pub id: String,
    /// The display name.
    pub name: String,
    /// The referral count required to earn the badge.
    pub requirement: u32,
}

impl Badge {
    fn new(id: &str, name: &str, requirement: u32) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            requirement,
        }
    }
}

/// The default catalog, ordered ascending by requirement.
pub fn default_catalog() -> Vec<Badge> {
    vec![
        Badge::new("first_referral", "First Referral", 1),
        Badge::new("active_referrer", "Active Referrer", 5),
        Badge::new("pro_referrer", "Pro Referrer", 10),
        Badge::new("golden_referrer", "Golden Referrer", 20),
        Badge::new("master_referrer", "Master Referrer", 50),
    ]
}

/// The first catalog badge, in ascending threshold order, whose requirement
/// is met and which is not already owned. Pure.
pub fn next_badge<'a>(
    catalog: &'a [Badge],
    referral_count: u32,
    owned: &[String],
) -> Option<&'a Badge> {
    catalog
        .iter()
        .find(|b| b.requirement <= referral_count && !owned.iter().any(|id| id == &b.id))
}

/// Every badge newly earned at `referral_count`, evaluated repeatedly so a
/// jump across several thresholds skips no intermediate badge. Previously
/// owned badges are never re-derived or removed.
pub fn newly_earned<'a>(
    catalog: &'a [Badge],
    referral_count: u32,
    owned: &[String],
) -> Vec<&'a Badge> {
    let mut owned: Vec<String> = owned.to_vec();
    let mut earned = Vec::new();
    while let Some(badge) = next_badge(catalog, referral_count, &owned) {
        owned.push(badge.id.clone());
        earned.push(badge);
    }
    earned
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog(thresholds: &[u32]) -> Vec<Badge> {
        thresholds
            .iter()
            .map(|t| Badge::new(&format!("badge_{t}"), &format!("Badge {t}"), *t))
            .collect()
    }

    #[test]
    fn awards_in_ascending_threshold_order() {
        let catalog = catalog(&[1, 3, 5]);
        let badge = next_badge(&catalog, 4, &[]).unwrap();
        assert_eq!(badge.id, "badge_1");
    }

    #[test]
    fn crossing_one_threshold_awards_exactly_that_badge() {
        let catalog = catalog(&[1, 3, 5]);
        // Count moves from 2 to 3 with the first badge already owned.
        let owned = vec!["badge_1".to_string()];
        let earned = newly_earned(&catalog, 3, &owned);
        assert_eq!(earned.len(), 1);
        assert_eq!(earned[0].id, "badge_3");
    }

    #[test]
    fn bulk_jump_skips_no_intermediate_badge() {
        let catalog = catalog(&[1, 3, 5]);
        let earned = newly_earned(&catalog, 5, &[]);
        let ids: Vec<&str> = earned.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, ["badge_1", "badge_3", "badge_5"]);
    }

    #[test]
    fn owned_set_is_monotonic_over_growing_counts() {
        let catalog = catalog(&[1, 3, 5]);
        let mut owned: Vec<String> = Vec::new();
        let mut previous = 0;
        for count in [0, 1, 1, 2, 4, 5, 9] {
            for badge in newly_earned(&catalog, count, &owned) {
                owned.push(badge.id.clone());
            }
            assert!(owned.len() >= previous);
            previous = owned.len();
        }
        assert_eq!(owned.len(), 3);
    }

    #[test]
    fn default_catalog_is_sorted() {
        let catalog = default_catalog();
        assert!(catalog.windows(2).all(|w| w[0].requirement < w[1].requirement));
    }
}
