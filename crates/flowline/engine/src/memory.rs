//! In-memory storage implementation

use crate::store::*;
use async_trait::async_trait;
use flowline_types::{
    DefinitionId, RoleId, Run, RunId, StorageError, StorageResult,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage for development and testing
#[derive(Debug, Default)]
pub struct InMemoryWorkflowStore {
    definitions: Arc<RwLock<HashMap<DefinitionId, DefinitionRecord>>>,
    runs: Arc<RwLock<HashMap<RunId, Run>>>,
    rotations: Arc<RwLock<HashMap<(DefinitionId, RoleId), u64>>>,
}

impl InMemoryWorkflowStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DefinitionStore for InMemoryWorkflowStore {
    async fn get_definition(&self, id: &DefinitionId) -> StorageResult<Option<DefinitionRecord>> {
        let definitions = self.definitions.read().await;
        Ok(definitions.get(id).cloned())
    }

    async fn put_definition(&self, record: DefinitionRecord) -> StorageResult<()> {
        let mut definitions = self.definitions.write().await;
        definitions.insert(record.id().clone(), record);
        Ok(())
    }

    async fn list_definitions(&self) -> StorageResult<Vec<DefinitionRecord>> {
        let definitions = self.definitions.read().await;
        let mut records: Vec<_> = definitions.values().cloned().collect();
        records.sort_by(|a, b| a.id().cmp(b.id()));
        Ok(records)
    }
}

#[async_trait]
impl RunStore for InMemoryWorkflowStore {
    async fn get_run(&self, id: &RunId) -> StorageResult<Option<Run>> {
        let runs = self.runs.read().await;
        Ok(runs.get(id).cloned())
    }

    async fn insert_run(&self, mut run: Run) -> StorageResult<Run> {
        let mut runs = self.runs.write().await;
        if runs.contains_key(&run.run_id) {
            return Err(StorageError::Conflict(format!(
                "run {} already exists",
                run.run_id
            )));
        }
        run.version = 1;
        runs.insert(run.run_id.clone(), run.clone());
        Ok(run)
    }

    async fn update_run(&self, mut run: Run) -> StorageResult<Run> {
        let mut runs = self.runs.write().await;
        let stored = runs
            .get(&run.run_id)
            .ok_or_else(|| StorageError::NotFound(format!("run {}", run.run_id)))?;
        if stored.version != run.version {
            return Err(StorageError::Conflict(format!(
                "run {} was modified concurrently (expected version {}, found {})",
                run.run_id, run.version, stored.version
            )));
        }
        run.version += 1;
        runs.insert(run.run_id.clone(), run.clone());
        Ok(run)
    }

    async fn list_runs(&self, filter: &RunFilter) -> StorageResult<Vec<Run>> {
        let runs = self.runs.read().await;
        let mut matching: Vec<_> = runs.values().filter(|r| filter.matches(r)).cloned().collect();
        matching.sort_by(|a, b| {
            a.started_at
                .cmp(&b.started_at)
                .then_with(|| a.run_id.cmp(&b.run_id))
        });
        Ok(matching)
    }
}

#[async_trait]
impl RotationStore for InMemoryWorkflowStore {
    async fn advance_rotation(
        &self,
        definition: &DefinitionId,
        role: &RoleId,
    ) -> StorageResult<u64> {
        let mut rotations = self.rotations.write().await;
        let cursor = rotations
            .entry((definition.clone(), role.clone()))
            .or_insert(0);
        let previous = *cursor;
        *cursor = cursor.wrapping_add(1);
        Ok(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use flowline_types::{Identity, RunStatus, StepId, ValidationResult, WorkflowDefinition};

    fn make_run(def: &str) -> Run {
        Run::new(
            DefinitionId::new(def),
            1,
            Identity::contact("ana@acme.test"),
            vec![StepId::new("a")],
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn test_update_run_checks_version() {
        let store = InMemoryWorkflowStore::new();
        let run = store.insert_run(make_run("d")).await.unwrap();
        assert_eq!(run.version, 1);

        let updated = store.update_run(run.clone()).await.unwrap();
        assert_eq!(updated.version, 2);

        let stale = store.update_run(run).await;
        assert!(matches!(stale, Err(StorageError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_insert_duplicate_run() {
        let store = InMemoryWorkflowStore::new();
        let run = make_run("d");
        store.insert_run(run.clone()).await.unwrap();
        assert!(matches!(
            store.insert_run(run).await,
            Err(StorageError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_list_runs_filter() {
        let store = InMemoryWorkflowStore::new();
        store.insert_run(make_run("a")).await.unwrap();
        let mut done = make_run("b");
        done.status = RunStatus::Completed;
        store.insert_run(done).await.unwrap();
        let mut archived = make_run("a");
        archived.archived = true;
        store.insert_run(archived).await.unwrap();

        assert_eq!(store.list_runs(&RunFilter::default()).await.unwrap().len(), 2);
        assert_eq!(store.list_runs(&RunFilter::in_progress()).await.unwrap().len(), 1);
        let for_a = RunFilter {
            include_archived: true,
            ..RunFilter::for_definition(DefinitionId::new("a"))
        };
        assert_eq!(store.list_runs(&for_a).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rotation_is_per_definition_and_role() {
        let store = InMemoryWorkflowStore::new();
        let d1 = DefinitionId::new("d1");
        let d2 = DefinitionId::new("d2");
        let role = RoleId::new("reviewer");

        assert_eq!(store.advance_rotation(&d1, &role).await.unwrap(), 0);
        assert_eq!(store.advance_rotation(&d1, &role).await.unwrap(), 1);
        assert_eq!(store.advance_rotation(&d2, &role).await.unwrap(), 0);
        assert_eq!(store.advance_rotation(&d1, &role).await.unwrap(), 2);
        assert_eq!(store.advance_rotation(&d2, &role).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_definitions_round_trip() {
        let store = InMemoryWorkflowStore::new();
        let def = WorkflowDefinition::new("Onboarding").with_id("onb");
        store
            .put_definition(DefinitionRecord::draft(def, ValidationResult::default(), Utc::now()))
            .await
            .unwrap();

        let record = store.get_definition(&DefinitionId::new("onb")).await.unwrap().unwrap();
        assert_eq!(record.status, DefinitionStatus::Draft);
        assert_eq!(store.list_definitions().await.unwrap().len(), 1);
    }
}
