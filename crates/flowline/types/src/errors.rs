//! Error types for Flowline

use crate::{DefinitionId, RoleId, RunId, StepId};

/// Errors that can occur in workflow operations
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum WorkflowError {
    #[error("Workflow definition not found: {0}")]
    DefinitionNotFound(DefinitionId),

    #[error("Workflow definition is not published: {0}")]
    DefinitionNotValid(DefinitionId),

    #[error("Workflow definition is published and cannot change: {0}")]
    DefinitionImmutable(DefinitionId),

    #[error("Run not found: {0}")]
    RunNotFound(RunId),

    #[error("Run already finished: {0}")]
    RunAlreadyTerminal(RunId),

    #[error("Run is paused: {0}")]
    RunPaused(RunId),

    #[error("Run is not in progress: {0}")]
    RunNotActive(RunId),

    #[error("Run is not paused: {0}")]
    RunNotPaused(RunId),

    #[error("Step not found: {0}")]
    StepNotFound(StepId),

    #[error("Step not active: {0}")]
    StepNotActive(StepId),

    #[error("Step {0} is waiting for a coordinator to assign it")]
    StepHeld(StepId),

    #[error("{actor} is not an outstanding assignee of step {step_id}")]
    NotAssigned { step_id: StepId, actor: String },

    #[error("Invalid outcome {outcome:?} for decision step {step_id}")]
    InvalidDecisionOutcome { step_id: StepId, outcome: String },

    #[error("Cannot resolve assignee for role {role_id}: {reason}")]
    UnresolvableAssignee { role_id: RoleId, reason: String },

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

impl WorkflowError {
    /// Stable failure identifier reported to callers
    pub fn code(&self) -> &'static str {
        match self {
            WorkflowError::DefinitionNotFound(_) => "DEFINITION_NOT_FOUND",
            WorkflowError::DefinitionNotValid(_) => "DEFINITION_NOT_VALID",
            WorkflowError::DefinitionImmutable(_) => "DEFINITION_IMMUTABLE",
            WorkflowError::RunNotFound(_) => "RUN_NOT_FOUND",
            WorkflowError::RunAlreadyTerminal(_) => "RUN_ALREADY_TERMINAL",
            WorkflowError::RunPaused(_) => "RUN_PAUSED",
            WorkflowError::RunNotActive(_) => "RUN_NOT_ACTIVE",
            WorkflowError::RunNotPaused(_) => "RUN_NOT_PAUSED",
            WorkflowError::StepNotFound(_) => "STEP_NOT_FOUND",
            WorkflowError::StepNotActive(_) => "STEP_NOT_ACTIVE",
            WorkflowError::StepHeld(_) => "STEP_HELD",
            WorkflowError::NotAssigned { .. } => "NOT_ASSIGNED",
            WorkflowError::InvalidDecisionOutcome { .. } => "INVALID_DECISION_OUTCOME",
            WorkflowError::UnresolvableAssignee { .. } => "UNRESOLVABLE_ASSIGNEE",
            WorkflowError::InvalidTransition(_) => "INVALID_TRANSITION",
            WorkflowError::Storage(StorageError::Conflict(_)) => "CONFLICT",
            WorkflowError::Storage(_) => "STORAGE_ERROR",
        }
    }
}

/// Result type alias for workflow operations
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised by persistence backends
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Concurrent modification or duplicate key
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Stored data could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Backend failure
    #[error("Backend error: {0}")]
    Backend(String),
}

/// Result type alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// A role could not be turned into an identity
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Cannot resolve role {role_id}: {reason}")]
pub struct ResolutionError {
    pub role_id: RoleId,
    pub reason: String,
}

impl ResolutionError {
    pub fn new(role_id: RoleId, reason: impl Into<String>) -> Self {
        Self {
            role_id,
            reason: reason.into(),
        }
    }
}

impl From<ResolutionError> for WorkflowError {
    fn from(err: ResolutionError) -> Self {
        WorkflowError::UnresolvableAssignee {
            role_id: err.role_id,
            reason: err.reason,
        }
    }
}
