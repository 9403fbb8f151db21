//! Sequence gating: a technique is reachable only when every technique
//! before it in curriculum order has at least one recorded attempt.

use crate::technique::TechniqueCatalog;
use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Read contract against the progress tracker. A technique counts as
/// completed when its attempt count is greater than zero.
#[async_trait]
pub trait ProgressStore: Send + Sync {
    async fn attempt_count(&self, user_id: &str, technique_id: &str) -> Result<u32>;
}

/// The outcome of an access check.
#[derive(Debug, Clone, Serialize)]
pub struct AccessCheck {
    pub can_access: bool,
    /// Predecessors the user has not attempted yet, in curriculum order.
    pub missing_techniques: Vec<String>,
    /// The user's first unattempted technique over the whole curriculum,
    /// independent of the technique being queried.
    pub next_in_sequence: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressSummary {
    pub completed: Vec<String>,
    pub completed_count: usize,
    pub total_count: usize,
    pub next_in_sequence: Option<String>,
    pub progress_percent: u8,
}

async fn first_incomplete(
    catalog: &TechniqueCatalog,
    store: &dyn ProgressStore,
    user_id: &str,
) -> Result<Option<String>> {
    for id in catalog.ordered_ids() {
        if store.attempt_count(user_id, id).await? == 0 {
            return Ok(Some(id.clone()));
        }
    }
    Ok(None)
}

/// Checks whether `user_id` may start `technique_id`.
///
/// `bypass` is an explicit capability granted by the caller (expert or
/// demo accounts); it skips the predecessor gate but the next-in-sequence
/// pointer is still computed. Unknown ids produce a neutral result with
/// no missing predecessors; callers reject unknown ids before gating.
pub async fn check_access(
    catalog: &TechniqueCatalog,
    store: &dyn ProgressStore,
    user_id: &str,
    technique_id: &str,
    bypass: bool,
) -> Result<AccessCheck> {
    let next_in_sequence = first_incomplete(catalog, store, user_id).await?;

    let mut missing = Vec::new();
    if !bypass {
        for id in catalog.predecessors(technique_id) {
            if store.attempt_count(user_id, id).await? == 0 {
                missing.push(id.clone());
            }
        }
    }

    Ok(AccessCheck {
        can_access: missing.is_empty(),
        missing_techniques: missing,
        next_in_sequence,
    })
}

pub async fn progress_summary(
    catalog: &TechniqueCatalog,
    store: &dyn ProgressStore,
    user_id: &str,
) -> Result<ProgressSummary> {
    let mut completed = Vec::new();
    let mut next_in_sequence = None;
    for id in catalog.ordered_ids() {
        if store.attempt_count(user_id, id).await? > 0 {
            completed.push(id.clone());
        } else if next_in_sequence.is_none() {
            next_in_sequence = Some(id.clone());
        }
    }
    let total_count = catalog.ordered_ids().len();
    let completed_count = completed.len();
    let progress_percent = if total_count == 0 {
        0
    } else {
        ((completed_count * 100) / total_count) as u8
    };
    Ok(ProgressSummary {
        completed,
        completed_count,
        total_count,
        next_in_sequence,
        progress_percent,
    })
}
