//! Workflow Engine: the entry point for definitions, runs and sweeps
//!
//! The engine ties the pieces together:
//! 1. Stores, validates and publishes definitions
//! 2. Starts runs and applies completion events through the state machine
//! 3. Serializes transitions per run and persists them with a version check
//! 4. Sweeps running steps for SLA breaches, reminders and escalations
//!
//! Notification delivery never decides whether a transition succeeds.
//! Assignment notifications are spawned after the run is saved; reminder
//! and escalation notifications wait in the run's outbox for the sweep.

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::locks::RunLocks;
use crate::memory::InMemoryWorkflowStore;
use crate::notify::{LogNotificationSender, NotificationSender};
use crate::plan::StepPlan;
use crate::resolver::AssigneeResolver;
use crate::sla::SlaMonitor;
use crate::state_machine::StateMachine;
use crate::store::{
    DefinitionRecord, DefinitionStatus, DefinitionStore, RunFilter, RunStore, WorkflowStore,
};
use crate::validator::validate_definition;
use flowline_types::*;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Counts from one sweep, for observability
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub runs_scanned: usize,
    pub breaches: usize,
    pub reminders: usize,
    pub escalations: usize,
    /// Outbox notifications delivered
    pub delivered: usize,
    /// Outbox notifications that failed and stay queued
    pub failed: usize,
    /// Outbox notifications given up on
    pub dropped: usize,
    /// Another sweep was still running
    pub skipped: bool,
}

impl SweepReport {
    pub fn has_activity(&self) -> bool {
        self.breaches + self.reminders + self.escalations + self.delivered + self.failed + self.dropped
            > 0
    }
}

/// A coordinator or participant action on one run
enum RunCommand {
    Complete(StepCompletion),
    Assign {
        step_id: StepId,
        role_id: RoleId,
        identity: Identity,
    },
    Cancel(String),
    Pause(String),
    Resume,
    Archive,
}

/// The workflow engine
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn WorkflowStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn NotificationSender>,
    locks: Arc<RunLocks>,
    sweeping: Arc<AtomicBool>,
    config: Arc<EngineConfig>,
    state_machine: StateMachine,
    sla: SlaMonitor,
}

impl std::fmt::Debug for WorkflowEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkflowEngine")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkflowEngine {
    /// Create an engine over a store, using wall-clock time and logging
    /// notifications
    pub fn new<S>(store: Arc<S>, config: EngineConfig) -> Self
    where
        S: WorkflowStore + 'static,
    {
        let resolver = AssigneeResolver::new(store.clone());
        Self {
            state_machine: StateMachine::new(resolver, config.max_automatic_steps),
            sla: SlaMonitor::new(config.sla.clone()),
            store,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotificationSender),
            locks: Arc::new(RunLocks::new()),
            sweeping: Arc::new(AtomicBool::new(false)),
            config: Arc::new(config),
        }
    }

    /// Create an engine over a fresh in-memory store
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(Arc::new(InMemoryWorkflowStore::new()), config)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSender>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── Definition Management ────────────────────────────────────────

    /// Validate a definition against a set of constraints
    pub fn validate(
        &self,
        definition: &WorkflowDefinition,
        constraints: &Constraints,
    ) -> ValidationResult {
        validate_definition(definition, constraints)
    }

    /// Store or replace a draft. Published and archived definitions are
    /// immutable.
    pub async fn save_draft(&self, definition: WorkflowDefinition) -> WorkflowResult<ValidationResult> {
        if let Some(existing) = self.store.get_definition(&definition.id).await? {
            if existing.status != DefinitionStatus::Draft {
                return Err(WorkflowError::DefinitionImmutable(definition.id));
            }
        }

        let validation = validate_definition(&definition, &definition.constraints);
        tracing::debug!(
            definition_id = %definition.id,
            errors = validation.errors.len(),
            warnings = validation.warnings.len(),
            "Workflow definition draft saved"
        );
        let record = DefinitionRecord::draft(definition, validation.clone(), self.clock.now());
        self.store.put_definition(record).await?;
        Ok(validation)
    }

    /// Validate a draft and publish it when it has no errors
    pub async fn publish(&self, id: &DefinitionId) -> WorkflowResult<ValidationResult> {
        let mut record = self.definition_record(id).await?;
        match record.status {
            DefinitionStatus::Published => return Ok(record.validation),
            DefinitionStatus::Archived => return Err(WorkflowError::DefinitionImmutable(id.clone())),
            DefinitionStatus::Draft => {}
        }

        let validation = validate_definition(&record.definition, &record.definition.constraints);
        let now = self.clock.now();
        record.validation = validation.clone();
        record.updated_at = now;
        if validation.valid {
            record.status = DefinitionStatus::Published;
            record.published_at = Some(now);
            tracing::info!(
                definition_id = %id,
                version = record.definition.version,
                "Workflow definition published"
            );
        } else {
            tracing::info!(
                definition_id = %id,
                errors = validation.errors.len(),
                "Workflow definition not published: validation failed"
            );
        }
        self.store.put_definition(record).await?;
        Ok(validation)
    }

    pub async fn get_definition(&self, id: &DefinitionId) -> WorkflowResult<DefinitionRecord> {
        self.definition_record(id).await
    }

    pub async fn list_definitions(&self) -> WorkflowResult<Vec<DefinitionRecord>> {
        Ok(self.store.list_definitions().await?)
    }

    /// Highest published version of the definitions with this name
    pub async fn latest_definition_by_name(
        &self,
        name: &str,
    ) -> WorkflowResult<Option<DefinitionRecord>> {
        let records = self.store.list_definitions().await?;
        Ok(records
            .into_iter()
            .filter(|r| r.is_published() && r.definition.name == name)
            .max_by_key(|r| r.definition.version))
    }

    /// Retire a definition; its runs carry on, new runs are refused
    pub async fn archive_definition(&self, id: &DefinitionId) -> WorkflowResult<DefinitionRecord> {
        let mut record = self.definition_record(id).await?;
        record.status = DefinitionStatus::Archived;
        record.updated_at = self.clock.now();
        self.store.put_definition(record.clone()).await?;
        tracing::info!(definition_id = %id, "Workflow definition archived");
        Ok(record)
    }

    async fn definition_record(&self, id: &DefinitionId) -> WorkflowResult<DefinitionRecord> {
        self.store
            .get_definition(id)
            .await?
            .ok_or_else(|| WorkflowError::DefinitionNotFound(id.clone()))
    }

    // ── Run Lifecycle ────────────────────────────────────────────────

    /// Start a run of a published definition
    pub async fn start_run(
        &self,
        definition_id: &DefinitionId,
        kickoff: KickoffData,
    ) -> WorkflowResult<Run> {
        let record = self.definition_record(definition_id).await?;
        match record.status {
            DefinitionStatus::Published => {}
            DefinitionStatus::Draft => {
                return Err(WorkflowError::DefinitionNotValid(definition_id.clone()))
            }
            DefinitionStatus::Archived => {
                return Err(WorkflowError::InvalidTransition(format!(
                    "definition {} is archived",
                    definition_id
                )))
            }
        }

        let definition = &record.definition;
        let plan = StepPlan::build(definition);
        let now = self.clock.now();
        let mut run = Run::new(
            definition.id.clone(),
            definition.version,
            kickoff.initiator.clone(),
            plan.step_ids(),
            now,
        );

        let transition = self
            .state_machine
            .start(&mut run, definition, &plan, kickoff, now)
            .await?;
        let run = self.store.insert_run(run).await?;

        tracing::info!(
            run_id = %run.run_id,
            definition = %definition_id,
            "Workflow run started"
        );
        if transition.run_completed {
            tracing::info!(run_id = %run.run_id, "Workflow run completed at start");
        }
        self.dispatch(transition.notifications);
        Ok(run)
    }

    /// Apply a step completion event
    pub async fn complete_step(
        &self,
        run_id: &RunId,
        completion: StepCompletion,
    ) -> WorkflowResult<Run> {
        self.apply(run_id, RunCommand::Complete(completion)).await
    }

    /// Bind an identity to a role a held step is waiting on
    pub async fn assign_step(
        &self,
        run_id: &RunId,
        step_id: &StepId,
        role_id: &RoleId,
        identity: Identity,
    ) -> WorkflowResult<Run> {
        let command = RunCommand::Assign {
            step_id: step_id.clone(),
            role_id: role_id.clone(),
            identity,
        };
        self.apply(run_id, command).await
    }

    pub async fn cancel_run(&self, run_id: &RunId, reason: &str) -> WorkflowResult<Run> {
        self.apply(run_id, RunCommand::Cancel(reason.to_string())).await
    }

    pub async fn pause_run(&self, run_id: &RunId, reason: &str) -> WorkflowResult<Run> {
        self.apply(run_id, RunCommand::Pause(reason.to_string())).await
    }

    pub async fn resume_run(&self, run_id: &RunId) -> WorkflowResult<Run> {
        self.apply(run_id, RunCommand::Resume).await
    }

    /// Hide a finished run from default listings
    pub async fn archive_run(&self, run_id: &RunId) -> WorkflowResult<Run> {
        self.apply(run_id, RunCommand::Archive).await
    }

    pub async fn get_run(&self, run_id: &RunId) -> WorkflowResult<Run> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.clone()))
    }

    pub async fn list_runs(&self, filter: &RunFilter) -> WorkflowResult<Vec<Run>> {
        Ok(self.store.list_runs(filter).await?)
    }

    /// Resolve a role against a run context
    pub async fn resolve_assignee(&self, role: &Role, ctx: &RunContext) -> WorkflowResult<Identity> {
        self.state_machine.resolver().resolve(role, ctx).await
    }

    /// Run a command under the run's lock; notifications go out only
    /// after the new state is saved
    async fn apply(&self, run_id: &RunId, command: RunCommand) -> WorkflowResult<Run> {
        let result = {
            let _guard = self.locks.lock(run_id).await;
            self.apply_locked(run_id, command).await
        };
        self.locks.release(run_id);

        let (run, notifications) = result?;
        self.dispatch(notifications);
        Ok(run)
    }

    async fn apply_locked(
        &self,
        run_id: &RunId,
        command: RunCommand,
    ) -> WorkflowResult<(Run, Vec<Notification>)> {
        let mut run = self.get_run(run_id).await?;
        let now = self.clock.now();

        let notifications = match command {
            RunCommand::Complete(completion) => {
                let record = self.definition_record(&run.definition_id).await?;
                let plan = StepPlan::build(&record.definition);
                let transition = self
                    .state_machine
                    .complete_step(&mut run, &record.definition, &plan, &completion, now)
                    .await?;
                if transition.run_completed {
                    tracing::info!(run_id = %run_id, "Workflow run completed");
                }
                transition.notifications
            }
            RunCommand::Assign {
                step_id,
                role_id,
                identity,
            } => {
                let record = self.definition_record(&run.definition_id).await?;
                let plan = StepPlan::build(&record.definition);
                let transition = self
                    .state_machine
                    .assign_step(&mut run, &plan, &step_id, &role_id, identity, now)?;
                tracing::info!(run_id = %run_id, step_id = %step_id, role = %role_id, "Step assigned");
                transition.notifications
            }
            RunCommand::Cancel(reason) => {
                self.state_machine.cancel(&mut run, &reason, now)?;
                tracing::info!(run_id = %run_id, reason = %reason, "Workflow run cancelled");
                Vec::new()
            }
            RunCommand::Pause(reason) => {
                self.state_machine.pause(&mut run, &reason, now)?;
                tracing::info!(run_id = %run_id, reason = %reason, "Workflow run paused");
                Vec::new()
            }
            RunCommand::Resume => {
                self.state_machine.resume(&mut run, now)?;
                tracing::info!(run_id = %run_id, "Workflow run resumed");
                Vec::new()
            }
            RunCommand::Archive => {
                if !run.is_terminal() {
                    return Err(WorkflowError::InvalidTransition(format!(
                        "run {} is not finished",
                        run_id
                    )));
                }
                run.archived = true;
                run.record(now, "run_archived", "Run archived");
                Vec::new()
            }
        };

        let run = self.store.update_run(run).await?;
        Ok((run, notifications))
    }

    /// Send notifications in the background
    fn dispatch(&self, notifications: Vec<Notification>) {
        for notification in notifications {
            let notifier = self.notifier.clone();
            let timeout = self.config.sla.delivery_timeout();
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, notifier.send(&notification)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(
                        run_id = %notification.run_id,
                        step_id = %notification.step_id,
                        error = %e,
                        "Assignment notification failed"
                    ),
                    Err(_) => tracing::warn!(
                        run_id = %notification.run_id,
                        step_id = %notification.step_id,
                        "Assignment notification timed out"
                    ),
                }
            });
        }
    }

    // ── SLA Sweep ────────────────────────────────────────────────────

    /// One pass over every open run: stamp SLA events, then deliver
    /// queued reminders and escalations.
    ///
    /// A sweep that starts while another is running does nothing and
    /// reports `skipped`.
    pub async fn sweep(&self) -> WorkflowResult<SweepReport> {
        let Some(_sweep) = SweepGuard::acquire(&self.sweeping) else {
            tracing::warn!("SLA sweep still running; skipping this tick");
            return Ok(SweepReport {
                skipped: true,
                ..SweepReport::default()
            });
        };

        let mut report = SweepReport::default();
        let runs = self.store.list_runs(&RunFilter::default()).await?;
        for run in runs {
            if run.status != RunStatus::InProgress && run.outbox.is_empty() {
                continue;
            }
            report.runs_scanned += 1;
            if let Err(e) = self.sweep_run(&run.run_id, &mut report).await {
                tracing::error!(run_id = %run.run_id, error = %e, "SLA sweep failed for run");
            }
        }

        if report.has_activity() {
            tracing::info!(
                runs = report.runs_scanned,
                breaches = report.breaches,
                reminders = report.reminders,
                escalations = report.escalations,
                delivered = report.delivered,
                failed = report.failed,
                dropped = report.dropped,
                "SLA sweep finished"
            );
        }
        Ok(report)
    }

    async fn sweep_run(&self, run_id: &RunId, report: &mut SweepReport) -> WorkflowResult<()> {
        let outbox = {
            let _guard = self.locks.lock(run_id).await;
            self.stamp_sla(run_id, report).await
        };
        self.locks.release(run_id);
        let outbox = outbox?;
        if outbox.is_empty() {
            return Ok(());
        }

        let timeout = self.config.sla.delivery_timeout();
        let attempts = outbox.iter().map(|pending| async move {
            let sent = tokio::time::timeout(timeout, self.notifier.send(&pending.notification)).await;
            (pending, sent)
        });

        let mut delivered = HashSet::new();
        let mut failed = HashSet::new();
        for (pending, sent) in futures::future::join_all(attempts).await {
            match sent {
                Ok(Ok(())) => {
                    delivered.insert(pending.id.clone());
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        run_id = %run_id,
                        step_id = %pending.notification.step_id,
                        kind = %pending.notification.kind,
                        error = %e,
                        "Notification delivery failed"
                    );
                    failed.insert(pending.id.clone());
                }
                Err(_) => {
                    tracing::warn!(
                        run_id = %run_id,
                        step_id = %pending.notification.step_id,
                        kind = %pending.notification.kind,
                        "Notification delivery timed out"
                    );
                    failed.insert(pending.id.clone());
                }
            }
        }

        let settled = {
            let _guard = self.locks.lock(run_id).await;
            self.settle_outbox(run_id, &delivered, &failed, report).await
        };
        self.locks.release(run_id);
        settled
    }

    /// Evaluate SLAs and save; returns the outbox to deliver
    async fn stamp_sla(
        &self,
        run_id: &RunId,
        report: &mut SweepReport,
    ) -> WorkflowResult<Vec<PendingNotification>> {
        let Some(mut run) = self.store.get_run(run_id).await? else {
            return Ok(Vec::new());
        };
        if run.status == RunStatus::InProgress {
            let record = self.definition_record(&run.definition_id).await?;
            let plan = StepPlan::build(&record.definition);
            let sla = self
                .sla
                .evaluate(&mut run, &record.definition, &plan, self.clock.now());
            if !sla.is_empty() {
                report.breaches += sla.breaches.len();
                report.reminders += sla.reminders.len();
                report.escalations += sla.escalations.len();
                run = self.store.update_run(run).await?;
            }
        }
        Ok(run.outbox)
    }

    /// Remove delivered notifications; count failures and drop those out
    /// of attempts
    async fn settle_outbox(
        &self,
        run_id: &RunId,
        delivered: &HashSet<String>,
        failed: &HashSet<String>,
        report: &mut SweepReport,
    ) -> WorkflowResult<()> {
        let Some(mut run) = self.store.get_run(run_id).await? else {
            return Ok(());
        };
        let max_attempts = self.config.sla.max_delivery_attempts;
        let before = run.outbox.len();

        run.outbox.retain_mut(|pending| {
            if delivered.contains(&pending.id) {
                report.delivered += 1;
                return false;
            }
            if !failed.contains(&pending.id) {
                return true;
            }
            pending.attempts += 1;
            if pending.attempts >= max_attempts {
                tracing::error!(
                    run_id = %pending.notification.run_id,
                    step_id = %pending.notification.step_id,
                    kind = %pending.notification.kind,
                    recipient = %pending.notification.recipient,
                    attempts = pending.attempts,
                    "Dropping notification after repeated delivery failures"
                );
                report.dropped += 1;
                return false;
            }
            report.failed += 1;
            true
        });

        if run.outbox.len() != before || !failed.is_empty() {
            self.store.update_run(run).await?;
        }
        Ok(())
    }
}

/// Marks a sweep in progress until dropped
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn make_definition() -> WorkflowDefinition {
        WorkflowDefinition::new("Vendor Onboarding")
            .with_id("vendor")
            .with_role(Role::new("ops", "Ops", Resolution::fixed("ops@acme.test")))
            .with_step(Step::form("details", "Details").assigned_to("ops"))
            .with_step(
                Step::approval("approve", "Approve")
                    .assigned_to("ops")
                    .due_in(RelativeDuration::days(2)),
            )
    }

    fn kickoff() -> KickoffData {
        KickoffData::new(Identity::user("u1", "ana@acme.test"))
    }

    async fn published(engine: &WorkflowEngine) -> DefinitionId {
        let def = make_definition();
        let id = def.id.clone();
        engine.save_draft(def).await.unwrap();
        assert!(engine.publish(&id).await.unwrap().valid);
        id
    }

    #[tokio::test]
    async fn test_draft_cannot_start_and_published_is_immutable() {
        let engine = WorkflowEngine::in_memory(EngineConfig::default());
        let def = make_definition();
        let id = def.id.clone();
        engine.save_draft(def.clone()).await.unwrap();

        let err = engine.start_run(&id, kickoff()).await.unwrap_err();
        assert_eq!(err.code(), "DEFINITION_NOT_VALID");
        let err = engine
            .start_run(&DefinitionId::new("missing"), kickoff())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "DEFINITION_NOT_FOUND");

        engine.publish(&id).await.unwrap();
        let err = engine.save_draft(def).await.unwrap_err();
        assert_eq!(err.code(), "DEFINITION_IMMUTABLE");
    }

    #[tokio::test]
    async fn test_invalid_definition_stays_draft() {
        let engine = WorkflowEngine::in_memory(EngineConfig::default());
        let def = WorkflowDefinition::new("Broken")
            .with_id("broken")
            .with_step(Step::task("a", "A").assigned_to("nobody"));
        let validation = engine.save_draft(def).await.unwrap();
        assert!(!validation.valid);

        let id = DefinitionId::new("broken");
        assert!(!engine.publish(&id).await.unwrap().valid);
        assert_eq!(
            engine.get_definition(&id).await.unwrap().status,
            DefinitionStatus::Draft
        );
    }

    #[tokio::test]
    async fn test_latest_definition_by_name() {
        let engine = WorkflowEngine::in_memory(EngineConfig::default());
        for version in [1, 3, 2] {
            let def = make_definition()
                .with_id(format!("vendor-v{}", version))
                .with_version(version);
            let id = def.id.clone();
            engine.save_draft(def).await.unwrap();
            engine.publish(&id).await.unwrap();
        }
        let latest = engine
            .latest_definition_by_name("Vendor Onboarding")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(latest.definition.version, 3);
        assert!(engine.latest_definition_by_name("Other").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_run_through_to_completion() {
        let engine = WorkflowEngine::in_memory(EngineConfig::default());
        let id = published(&engine).await;

        let run = engine.start_run(&id, kickoff()).await.unwrap();
        assert_eq!(run.version, 1);
        assert_eq!(run.active_step_ids(), vec![&StepId::new("details")]);

        let run = engine
            .complete_step(&run.run_id, StepCompletion::new("details", json!({ "name": "Acme" })))
            .await
            .unwrap();
        assert_eq!(run.version, 2);

        let run = engine
            .complete_step(&run.run_id, StepCompletion::new("approve", json!({})))
            .await
            .unwrap();
        assert_eq!(run.status, RunStatus::Completed);

        let err = engine
            .complete_step(&run.run_id, StepCompletion::new("approve", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STEP_NOT_ACTIVE");

        let archived = engine.archive_run(&run.run_id).await.unwrap();
        assert!(archived.archived);
        assert!(engine.list_runs(&RunFilter::default()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_transition_leaves_run_unchanged() {
        let engine = WorkflowEngine::in_memory(EngineConfig::default());
        let id = published(&engine).await;
        let run = engine.start_run(&id, kickoff()).await.unwrap();

        let err = engine
            .complete_step(&run.run_id, StepCompletion::new("approve", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "STEP_NOT_ACTIVE");
        assert_eq!(engine.get_run(&run.run_id).await.unwrap(), run);

        let err = engine
            .complete_step(&RunId::new("nope"), StepCompletion::new("details", json!({})))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RUN_NOT_FOUND");
    }

    #[tokio::test]
    async fn test_sweep_stamps_and_delivers() {
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = WorkflowEngine::in_memory(EngineConfig::default()).with_clock(clock.clone());
        let id = published(&engine).await;
        let run = engine.start_run(&id, kickoff()).await.unwrap();
        engine
            .complete_step(&run.run_id, StepCompletion::new("details", json!({})))
            .await
            .unwrap();

        clock.advance(Duration::days(3));
        let report = engine.sweep().await.unwrap();
        assert_eq!(report.breaches, 1);
        assert_eq!(report.escalations, 1);
        assert_eq!(report.reminders, 1);
        assert_eq!(report.delivered, 2);

        let run = engine.get_run(&run.run_id).await.unwrap();
        assert!(run.outbox.is_empty());
        assert!(run.step(&StepId::new("approve")).unwrap().escalated_at.is_some());
    }

    #[test]
    fn test_sweep_guard() {
        let flag = AtomicBool::new(false);
        let guard = SweepGuard::acquire(&flag).unwrap();
        assert!(SweepGuard::acquire(&flag).is_none());
        drop(guard);
        assert!(SweepGuard::acquire(&flag).is_some());
    }
}
