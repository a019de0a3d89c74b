//! Usage statistics over the combination cache.

use chrono::{DateTime, Utc};
use fusion_store::StoreError;
use fusion_types::{ElementId, OrderKey};
use serde::Serialize;

use crate::combine::CombinationEngine;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopularElement {
    pub element_id: ElementId,
    pub name: String,
    pub emoji: String,
    pub usage_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PopularPair {
    pub order_key: OrderKey,
    pub usage_count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UsageStats {
    /// One entry per combination, so an element reached through several
    /// pairs can appear more than once.
    pub popular_elements: Vec<PopularElement>,
    pub popular_pairs: Vec<PopularPair>,
    pub total_combinations: u64,
    pub generated_at: DateTime<Utc>,
}

impl CombinationEngine {
    pub fn usage_stats(&self, limit: u32) -> Result<UsageStats, StoreError> {
        let generated_at = self.now();
        self.store().transaction(|uow| {
            let popular_elements = uow
                .top_result_elements(limit)?
                .into_iter()
                .map(|(element, usage_count)| PopularElement {
                    element_id: element.id,
                    name: element.name,
                    emoji: element.emoji,
                    usage_count,
                })
                .collect();
            let popular_pairs = uow
                .top_pairs(limit)?
                .into_iter()
                .map(|(order_key, usage_count)| PopularPair {
                    order_key,
                    usage_count,
                })
                .collect();
            Ok(UsageStats {
                popular_elements,
                popular_pairs,
                total_combinations: uow.combination_count()?,
                generated_at,
            })
        })
    }
}
