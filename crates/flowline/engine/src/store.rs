//! Persistence seams
//!
//! The engine reads and writes definitions, runs and round-robin cursors
//! only through these traits. Implementations must make
//! [`RunStore::update_run`] an atomic compare-and-swap on the run's
//! `version` and [`RotationStore::advance_rotation`] an atomic increment.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use flowline_types::{
    DefinitionId, RoleId, Run, RunId, RunStatus, StorageResult, ValidationResult,
    WorkflowDefinition,
};
use serde::{Deserialize, Serialize};

/// Publication state of a stored definition
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DefinitionStatus {
    /// Editable; cannot be run
    Draft,
    /// Validated and immutable; runs may start
    Published,
    /// Retired; no new runs
    Archived,
}

/// A definition as kept by the store
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionRecord {
    pub definition: WorkflowDefinition,
    pub status: DefinitionStatus,
    /// Result of the most recent validation
    pub validation: ValidationResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl DefinitionRecord {
    pub fn draft(
        definition: WorkflowDefinition,
        validation: ValidationResult,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            definition,
            status: DefinitionStatus::Draft,
            validation,
            published_at: None,
            updated_at: now,
        }
    }

    pub fn id(&self) -> &DefinitionId {
        &self.definition.id
    }

    pub fn is_published(&self) -> bool {
        self.status == DefinitionStatus::Published
    }
}

/// Which runs to list
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RunFilter {
    pub definition_id: Option<DefinitionId>,
    pub status: Option<RunStatus>,
    pub include_archived: bool,
}

impl RunFilter {
    /// Runs in progress; what the SLA sweep scans
    pub fn in_progress() -> Self {
        Self {
            status: Some(RunStatus::InProgress),
            ..Self::default()
        }
    }

    pub fn for_definition(definition_id: DefinitionId) -> Self {
        Self {
            definition_id: Some(definition_id),
            ..Self::default()
        }
    }

    pub fn matches(&self, run: &Run) -> bool {
        self.definition_id
            .as_ref()
            .map_or(true, |id| &run.definition_id == id)
            && self.status.map_or(true, |status| run.status == status)
            && (self.include_archived || !run.archived)
    }
}

/// Storage for workflow definitions
#[async_trait]
pub trait DefinitionStore: Send + Sync {
    /// Get a definition by ID
    async fn get_definition(&self, id: &DefinitionId) -> StorageResult<Option<DefinitionRecord>>;

    /// Create or replace a definition
    async fn put_definition(&self, record: DefinitionRecord) -> StorageResult<()>;

    /// List all definitions
    async fn list_definitions(&self) -> StorageResult<Vec<DefinitionRecord>>;
}

/// Storage for runs
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Get a run by ID
    async fn get_run(&self, id: &RunId) -> StorageResult<Option<Run>>;

    /// Insert a new run; `Conflict` if the id exists
    async fn insert_run(&self, run: Run) -> StorageResult<Run>;

    /// Replace a run if its `version` matches the stored one; the stored
    /// copy gets the next version and is returned
    async fn update_run(&self, run: Run) -> StorageResult<Run>;

    /// List runs matching a filter
    async fn list_runs(&self, filter: &RunFilter) -> StorageResult<Vec<Run>>;
}

/// Round-robin cursors, one per (definition, role)
#[async_trait]
pub trait RotationStore: Send + Sync {
    /// Atomically increment the cursor, returning its previous value
    async fn advance_rotation(&self, definition: &DefinitionId, role: &RoleId)
        -> StorageResult<u64>;
}

/// Everything the engine persists
pub trait WorkflowStore: DefinitionStore + RunStore + RotationStore + Send + Sync {}

impl<T> WorkflowStore for T where T: DefinitionStore + RunStore + RotationStore + Send + Sync {}
