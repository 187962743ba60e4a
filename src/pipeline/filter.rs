//! Eligibility filtering and publish ordering.

use std::cmp::Ordering;

use crate::models::{Event, RarityTier};

/// Whether an event is worth publishing under the given minimum tier.
///
/// Events without a computed tier are never eligible.
pub fn is_eligible(event: &Event, min_tier: RarityTier) -> bool {
    event
        .rarity_tier
        .is_some_and(|tier| tier.rank() >= min_tier.rank())
}

/// Order events rarest first (lowest percentage). The sort is stable, so
/// events with equal rarity keep their fetched order.
pub fn rank_for_publish<'a>(events: impl IntoIterator<Item = &'a Event>) -> Vec<&'a Event> {
    let mut ranked: Vec<&Event> = events.into_iter().collect();
    ranked.sort_by(|a, b| {
        a.ranking_percentage()
            .partial_cmp(&b.ranking_percentage())
            .unwrap_or(Ordering::Equal)
    });
    ranked
}

/// Filter eligible events and rank them for publishing.
pub fn select_for_publish(events: &[Event], min_tier: RarityTier) -> Vec<&Event> {
    rank_for_publish(events.iter().filter(|e| is_eligible(e, min_tier)))
}
