//! Assignment tracking
//!
//! An assignment ties a conversation to the team member responsible for it.
//! At most one assignment per conversation is active (`completed_at` unset);
//! the tracker owns that invariant — the state machine calls in here rather
//! than touching assignment rows itself.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use shared::error::CommonError;
use shared::primitives::{WrappedChronoDateTime, WrappedUuidV4};
use utoipa::ToSchema;

use crate::repository::AssignmentRepositoryLike;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub id: WrappedUuidV4,
    pub conversation_id: WrappedUuidV4,
    pub user_id: String,
    pub assigned_by: String,
    pub assigned_at: WrappedChronoDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<WrappedChronoDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Assignment {
    pub fn is_active(&self) -> bool {
        self.completed_at.is_none()
    }
}

// --- Logic Functions ---

/// The single active assignment for a conversation, if any.
pub async fn get_active<R: AssignmentRepositoryLike>(
    repository: &R,
    conversation_id: &WrappedUuidV4,
) -> Result<Option<Assignment>, CommonError> {
    repository.get_active_assignment(conversation_id).await
}

/// Complete an assignment. Completing an already-completed assignment is a
/// no-op returning the stored row.
pub async fn complete<R: AssignmentRepositoryLike>(
    repository: &R,
    assignment_id: &WrappedUuidV4,
    completed_by: &str,
) -> Result<Assignment, CommonError> {
    let existing = repository
        .get_assignment_by_id(assignment_id)
        .await?
        .ok_or_else(|| CommonError::not_found("Assignment", assignment_id))?;

    if !existing.is_active() {
        return Ok(existing);
    }

    repository
        .complete_assignment(assignment_id, completed_by, WrappedChronoDateTime::now())
        .await
}

/// Attach or replace the free-form notes on an assignment.
pub async fn annotate<R: AssignmentRepositoryLike>(
    repository: &R,
    assignment_id: &WrappedUuidV4,
    notes: &str,
) -> Result<Assignment, CommonError> {
    repository
        .get_assignment_by_id(assignment_id)
        .await?
        .ok_or_else(|| CommonError::not_found("Assignment", assignment_id))?;

    repository.annotate_assignment(assignment_id, notes).await
}

#[cfg(test)]
mod tests {
    mod unit {
        use super::super::*;

        fn sample(completed: bool) -> Assignment {
            let now = WrappedChronoDateTime::now();
            Assignment {
                id: WrappedUuidV4::new(),
                conversation_id: WrappedUuidV4::new(),
                user_id: "user-a".to_string(),
                assigned_by: "user-b".to_string(),
                assigned_at: now,
                completed_at: completed.then_some(now),
                completed_by: completed.then(|| "user-b".to_string()),
                notes: None,
            }
        }

        #[test]
        fn test_is_active() {
            assert!(sample(false).is_active());
            assert!(!sample(true).is_active());
        }

        #[test]
        fn test_wire_format_is_camel_case() {
            let json = serde_json::to_string(&sample(false)).unwrap();
            assert!(json.contains("\"userId\":\"user-a\""));
            assert!(json.contains("\"assignedBy\":\"user-b\""));
            assert!(!json.contains("completedAt"));
        }
    }
}
