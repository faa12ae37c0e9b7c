//! Runs: executions of a workflow definition
//!
//! A [`Run`] carries one [`StepExecution`] per step of its definition
//! (nested branch steps included, in execution order) plus the cursors of
//! every path that is currently open. Runs keep their full history: step
//! executions are never removed, only archived into
//! [`StepExecution::previous_attempts`] when a goto re-enters a step.

use crate::{DefinitionId, Identity, MilestoneId, PendingNotification, RoleId, StepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ── Run Identifier ───────────────────────────────────────────────────

/// Unique identifier for a run
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub String);

impl RunId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Run ──────────────────────────────────────────────────────────────

/// A run of a workflow definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Run {
    pub run_id: RunId,
    pub definition_id: DefinitionId,
    pub definition_version: u32,
    pub status: RunStatus,
    /// Index of the main path's current step
    pub current_step_index: usize,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    /// Who started the run
    pub initiator: Identity,
    /// Kickoff form answers
    #[serde(default)]
    pub kickoff: HashMap<String, Value>,
    /// Flow variable bindings
    #[serde(default)]
    pub variable_bindings: HashMap<String, Value>,
    /// Bindings can no longer change
    #[serde(default)]
    pub variables_frozen: bool,
    /// One execution per step, indexed by step index
    pub steps: Vec<StepExecution>,
    /// One cursor per open path
    #[serde(default)]
    pub cursors: Vec<Cursor>,
    #[serde(default)]
    pub milestones_reached: Vec<MilestoneRecord>,
    /// Reminder and escalation notifications awaiting delivery
    #[serde(default)]
    pub outbox: Vec<PendingNotification>,
    /// Ordered record of everything that happened to the run
    #[serde(default)]
    pub audit: Vec<AuditEntry>,
    #[serde(default)]
    pub archived: bool,
    pub updated_at: DateTime<Utc>,
    /// Incremented on every persisted change
    #[serde(default)]
    pub version: u64,
}

impl Run {
    /// Create a run with one pending execution per step id
    pub fn new(
        definition_id: DefinitionId,
        definition_version: u32,
        initiator: Identity,
        step_ids: impl IntoIterator<Item = StepId>,
        now: DateTime<Utc>,
    ) -> Self {
        let steps = step_ids
            .into_iter()
            .enumerate()
            .map(|(index, step_id)| StepExecution::new(step_id, index))
            .collect();

        Self {
            run_id: RunId::generate(),
            definition_id,
            definition_version,
            status: RunStatus::InProgress,
            current_step_index: 0,
            started_at: now,
            completed_at: None,
            cancelled_at: None,
            due_at: None,
            initiator,
            kickoff: HashMap::new(),
            variable_bindings: HashMap::new(),
            variables_frozen: false,
            steps,
            cursors: Vec::new(),
            milestones_reached: Vec::new(),
            outbox: Vec::new(),
            audit: Vec::new(),
            archived: false,
            updated_at: now,
            version: 0,
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Mark the run completed
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(now);
        self.cursors.clear();
        self.record(now, "run_completed", "Run completed");
    }

    /// Cancel the run; step executions stay as they are
    pub fn cancel(&mut self, now: DateTime<Utc>, reason: &str) {
        self.status = RunStatus::Cancelled;
        self.cancelled_at = Some(now);
        self.record(now, "run_cancelled", format!("Run cancelled: {}", reason));
    }

    pub fn pause(&mut self, now: DateTime<Utc>, reason: &str) {
        self.status = RunStatus::Paused;
        self.record(now, "run_paused", format!("Run paused: {}", reason));
    }

    pub fn resume(&mut self, now: DateTime<Utc>) {
        self.status = RunStatus::InProgress;
        self.record(now, "run_resumed", "Run resumed");
    }

    // ── Query methods ────────────────────────────────────────────────

    pub fn is_active(&self) -> bool {
        self.status == RunStatus::InProgress
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Execution of a step by id (latest attempt)
    pub fn step(&self, step_id: &StepId) -> Option<&StepExecution> {
        self.steps.iter().find(|s| &s.step_id == step_id)
    }

    pub fn step_mut(&mut self, step_id: &StepId) -> Option<&mut StepExecution> {
        self.steps.iter_mut().find(|s| &s.step_id == step_id)
    }

    /// Executions currently in progress
    pub fn active_steps(&self) -> Vec<&StepExecution> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::InProgress)
            .collect()
    }

    pub fn active_step_ids(&self) -> Vec<&StepId> {
        self.active_steps().into_iter().map(|s| &s.step_id).collect()
    }

    /// Steps waiting for a coordinator to bind an assignee
    pub fn held_steps(&self) -> Vec<&StepExecution> {
        self.steps
            .iter()
            .filter(|s| s.status == StepStatus::InProgress && s.hold.is_some())
            .collect()
    }

    pub fn has_reached(&self, milestone: &MilestoneId) -> bool {
        self.milestones_reached
            .iter()
            .any(|m| &m.milestone_id == milestone)
    }

    /// Result data of a completed step
    pub fn step_output(&self, step_id: &StepId) -> Option<&Value> {
        self.step(step_id)
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| &s.result_data)
    }

    /// Append an audit entry
    pub fn record(
        &mut self,
        now: DateTime<Utc>,
        event_type: impl Into<String>,
        description: impl Into<String>,
    ) {
        self.audit.push(AuditEntry {
            sequence: self.audit.len() as u64,
            event_type: event_type.into(),
            description: description.into(),
            timestamp: now,
        });
        self.updated_at = now;
    }
}

// ── Run Status ───────────────────────────────────────────────────────

/// Lifecycle state of a run
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunStatus {
    InProgress,
    Paused,
    Completed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

// ── Cursor ───────────────────────────────────────────────────────────

/// Position of an open path: `position` indexes the path's step list
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    pub path: usize,
    pub position: usize,
}

// ── Step Execution ───────────────────────────────────────────────────

/// Per-run state of one step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepExecution {
    pub step_id: StepId,
    pub step_index: usize,
    pub status: StepStatus,
    /// Resolved owners, one per assignee role
    #[serde(default)]
    pub assigned_to: Vec<Assignment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hold: Option<AssignmentHold>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_to_complete_secs: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sla_breached_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub reminder_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_reminder_at: Option<DateTime<Utc>>,
    /// Chosen outcome key of a decision
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome: Option<String>,
    #[serde(default)]
    pub result_data: Value,
    /// How many times the step has been re-entered by a goto
    #[serde(default)]
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub previous_attempts: Vec<StepExecution>,
}

impl StepExecution {
    pub fn new(step_id: StepId, step_index: usize) -> Self {
        Self {
            step_id,
            step_index,
            status: StepStatus::Pending,
            assigned_to: Vec::new(),
            hold: None,
            due_at: None,
            started_at: None,
            completed_at: None,
            time_to_complete_secs: None,
            sla_breached_at: None,
            escalated_at: None,
            reminder_count: 0,
            last_reminder_at: None,
            outcome: None,
            result_data: Value::Null,
            iteration: 0,
            previous_attempts: Vec::new(),
        }
    }

    /// Start a fresh attempt. A step that already ran is archived into
    /// `previous_attempts` and its counters start over.
    pub fn begin_attempt(&mut self) {
        if self.status == StepStatus::Pending {
            return;
        }
        let mut attempt = std::mem::replace(
            self,
            StepExecution::new(self.step_id.clone(), self.step_index),
        );
        self.iteration = attempt.iteration + 1;
        self.previous_attempts = std::mem::take(&mut attempt.previous_attempts);
        self.previous_attempts.push(attempt);
    }

    /// Move to `IN_PROGRESS`, archiving any earlier attempt
    pub fn activate(&mut self, now: DateTime<Utc>) {
        self.begin_attempt();
        self.status = StepStatus::InProgress;
        self.started_at = Some(now);
    }

    /// Move to `COMPLETED`, stamping completion time and duration
    pub fn complete(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(now);
        self.time_to_complete_secs = self
            .started_at
            .map(|started| now.signed_duration_since(started).num_seconds());
    }

    pub fn skip(&mut self, now: DateTime<Utc>) {
        self.status = StepStatus::Skipped;
        self.completed_at = Some(now);
    }

    pub fn is_active(&self) -> bool {
        self.status == StepStatus::InProgress
    }

    /// Assignees that have not responded yet
    pub fn outstanding(&self) -> impl Iterator<Item = &Assignment> {
        self.assigned_to.iter().filter(|a| a.responded_at.is_none())
    }

    pub fn responses(&self) -> usize {
        self.assigned_to
            .iter()
            .filter(|a| a.responded_at.is_some())
            .count()
    }

    /// Whether the due date has passed at `now`
    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.due_at.map(|due| now >= due).unwrap_or(false)
    }
}

/// Status of a step execution
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
}

/// A resolved owner of a step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub role_id: RoleId,
    pub identity: Identity,
    pub assigned_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
}

impl Assignment {
    pub fn new(role_id: RoleId, identity: Identity, now: DateTime<Utc>) -> Self {
        Self {
            role_id,
            identity,
            assigned_at: now,
            responded_at: None,
        }
    }
}

/// A step whose assignee could not be resolved
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentHold {
    /// Roles still waiting for an identity
    pub roles: Vec<RoleId>,
    pub reason: String,
    pub since: DateTime<Utc>,
}

/// A milestone the run has passed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneRecord {
    pub milestone_id: MilestoneId,
    pub step_id: StepId,
    pub reached_at: DateTime<Utc>,
}

/// An entry in a run's audit trail
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEntry {
    /// Monotonically increasing sequence number
    pub sequence: u64,
    pub event_type: String,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

// ── Inputs ───────────────────────────────────────────────────────────

/// An external step-completion event
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepCompletion {
    pub step_id: StepId,
    #[serde(default)]
    pub result_data: Value,
    /// Email of the responding assignee; `None` for system responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
}

impl StepCompletion {
    pub fn new(step_id: impl Into<String>, result_data: Value) -> Self {
        Self {
            step_id: StepId::new(step_id),
            result_data,
            actor: None,
        }
    }

    /// Completion of a decision with the given outcome key
    pub fn outcome(step_id: impl Into<String>, outcome: impl Into<String>) -> Self {
        Self::new(
            step_id,
            serde_json::json!({ "outcome": outcome.into() }),
        )
    }

    pub fn by(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// The `outcome` field of the result data, if it is a string
    pub fn outcome_key(&self) -> Option<&str> {
        self.result_data.get("outcome").and_then(Value::as_str)
    }
}

/// Everything assignee resolution may read about a run
#[derive(Clone, Debug, PartialEq)]
pub struct RunContext {
    pub definition_id: DefinitionId,
    pub initiator: Identity,
    pub kickoff: HashMap<String, Value>,
    pub variables: HashMap<String, Value>,
    pub step_outputs: HashMap<StepId, Value>,
}

impl RunContext {
    pub fn new(definition_id: DefinitionId, initiator: Identity) -> Self {
        Self {
            definition_id,
            initiator,
            kickoff: HashMap::new(),
            variables: HashMap::new(),
            step_outputs: HashMap::new(),
        }
    }

    pub fn with_kickoff(mut self, field: impl Into<String>, value: Value) -> Self {
        self.kickoff.insert(field.into(), value);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn with_step_output(mut self, step_id: impl Into<String>, value: Value) -> Self {
        self.step_outputs.insert(StepId::new(step_id), value);
        self
    }

    /// Snapshot the parts of a run that resolution reads
    pub fn from_run(run: &Run) -> Self {
        let step_outputs = run
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Completed)
            .map(|s| (s.step_id.clone(), s.result_data.clone()))
            .collect();

        Self {
            definition_id: run.definition_id.clone(),
            initiator: run.initiator.clone(),
            kickoff: run.kickoff.clone(),
            variables: run.variable_bindings.clone(),
            step_outputs,
        }
    }
}

/// Input of a start-run operation
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KickoffData {
    pub initiator: Identity,
    #[serde(default)]
    pub answers: HashMap<String, Value>,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
}

impl KickoffData {
    pub fn new(initiator: Identity) -> Self {
        Self {
            initiator,
            answers: HashMap::new(),
            variables: HashMap::new(),
        }
    }

    pub fn with_answer(mut self, field: impl Into<String>, value: Value) -> Self {
        self.answers.insert(field.into(), value);
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }
}
