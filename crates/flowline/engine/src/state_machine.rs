//! State machine: step activation and run transitions
//!
//! The state machine is the heart of the engine. It decides which steps
//! to activate next, opens and joins parallel branches, routes decisions,
//! follows gotos and records milestones.
//!
//! Every operation works on a `&mut Run` the caller owns. On error the
//! run may be half-modified; callers apply transitions to a copy and keep
//! it only on success.
//!
//! System steps (milestone markers, branch containers, gotos) are
//! processed as soon as they are entered, through a work queue rather than
//! recursion, and each one costs a unit of the per-event budget.

use crate::plan::{StepPlan, MAIN_PATH};
use crate::resolver::AssigneeResolver;
use chrono::{DateTime, Utc};
use flowline_types::*;
use serde_json::Value;
use std::collections::VecDeque;

/// What a transition did, for the caller to act on once it is persisted
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Transition {
    /// Steps entered, in order
    pub activated: Vec<StepId>,
    /// Steps completed, in order
    pub completed: Vec<StepId>,
    /// Assignment notifications to send
    pub notifications: Vec<Notification>,
    pub run_completed: bool,
}

/// Manages run transitions
#[derive(Clone, Debug)]
pub struct StateMachine {
    resolver: AssigneeResolver,
    max_automatic_steps: usize,
}

impl StateMachine {
    pub fn new(resolver: AssigneeResolver, max_automatic_steps: usize) -> Self {
        Self {
            resolver,
            max_automatic_steps,
        }
    }

    pub fn resolver(&self) -> &AssigneeResolver {
        &self.resolver
    }

    /// Bind kickoff data and activate the first main-path step
    pub async fn start(
        &self,
        run: &mut Run,
        definition: &WorkflowDefinition,
        plan: &StepPlan,
        kickoff: KickoffData,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Transition> {
        check_shape(run, plan)?;
        if plan.is_empty() {
            return Err(WorkflowError::InvalidTransition(format!(
                "definition {} has no steps",
                definition.id
            )));
        }

        if let Some(key) = kickoff
            .variables
            .keys()
            .find(|key| definition.variable(key).is_none())
        {
            return Err(WorkflowError::InvalidTransition(format!(
                "unknown flow variable '{}'",
                key
            )));
        }
        if let Some(missing) = definition.variables.iter().find(|v| {
            v.required
                && kickoff
                    .variables
                    .get(&v.key)
                    .map_or(true, |value| value.is_null())
        }) {
            return Err(WorkflowError::InvalidTransition(format!(
                "required flow variable '{}' is not bound",
                missing.key
            )));
        }

        run.kickoff = kickoff.answers;
        run.variable_bindings = kickoff.variables;
        run.variables_frozen = definition.constraints.variables_set_only_at_initiation;
        run.due_at = definition.due.map(|due| due_at(due, now)).transpose()?;
        run.record(now, "run_started", format!("Run started by {}", run.initiator));

        let mut pass = self.pass(run, definition, plan, now);
        pass.queue.push_back(Work::Enter {
            path: MAIN_PATH,
            position: 0,
        });
        pass.drive().await?;
        Ok(pass.transition)
    }

    /// Apply an external completion event
    pub async fn complete_step(
        &self,
        run: &mut Run,
        definition: &WorkflowDefinition,
        plan: &StepPlan,
        completion: &StepCompletion,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Transition> {
        check_shape(run, plan)?;

        let step_id = &completion.step_id;
        let idx = plan
            .index_of(step_id)
            .ok_or_else(|| WorkflowError::StepNotFound(step_id.clone()))?;
        let node = plan.node(idx);

        // A step that already finished reports itself even on a closed run
        if node.step.is_system() || run.steps[idx].status != StepStatus::InProgress {
            return Err(WorkflowError::StepNotActive(step_id.clone()));
        }
        ensure_accepts_events(run)?;
        if run.steps[idx].hold.is_some() {
            return Err(WorkflowError::StepHeld(step_id.clone()));
        }

        let outcome = match &node.step.kind {
            StepKind::Decision { outcomes } => {
                let key = completion.outcome_key().unwrap_or_default();
                let chosen = outcomes.iter().find(|o| o.key == key).ok_or_else(|| {
                    WorkflowError::InvalidDecisionOutcome {
                        step_id: step_id.clone(),
                        outcome: key.to_string(),
                    }
                })?;
                Some(chosen)
            }
            _ => None,
        };

        let exec = &mut run.steps[idx];
        let responder = match &completion.actor {
            Some(actor) => {
                let outstanding = exec
                    .assigned_to
                    .iter()
                    .position(|a| a.responded_at.is_none() && a.identity.email() == actor);
                match outstanding {
                    Some(slot) => Some(slot),
                    None if exec.assigned_to.iter().any(|a| a.identity.email() == actor) => {
                        return Err(WorkflowError::StepNotActive(step_id.clone()));
                    }
                    None => {
                        return Err(WorkflowError::NotAssigned {
                            step_id: step_id.clone(),
                            actor: actor.clone(),
                        });
                    }
                }
            }
            None => exec.assigned_to.iter().position(|a| a.responded_at.is_none()),
        };

        if let Some(slot) = responder {
            exec.assigned_to[slot].responded_at = Some(now);
        }
        let responses = exec.responses() + usize::from(responder.is_none());
        let total = exec.assigned_to.len();
        let who = completion.actor.as_deref().unwrap_or("system").to_string();
        run.record(
            now,
            "step_response",
            format!("{} responded to step {} ({}/{})", who, step_id, responses, total),
        );

        if !node.step.completion_policy.is_satisfied(responses, total) {
            tracing::debug!(
                run_id = %run.run_id,
                step_id = %step_id,
                responses,
                total,
                "Step waiting for more responses"
            );
            return Ok(Transition::default());
        }

        let exec = &mut run.steps[idx];
        exec.result_data = completion.result_data.clone();
        exec.outcome = outcome.map(|o| o.key.clone());
        exec.complete(now);
        run.record(now, "step_completed", format!("Step {} completed", step_id));
        apply_variables(run, &node.step, &completion.result_data);

        let mut pass = self.pass(run, definition, plan, now);
        pass.transition.completed.push(step_id.clone());
        match outcome.and_then(|o| o.target.as_ref()) {
            Some(target) => pass.route_forward(idx, target)?,
            None => pass.queue.push_back(Work::Enter {
                path: node.path,
                position: node.position + 1,
            }),
        }
        pass.drive().await?;
        Ok(pass.transition)
    }

    /// Bind an identity to a role a held step is waiting on
    pub fn assign_step(
        &self,
        run: &mut Run,
        plan: &StepPlan,
        step_id: &StepId,
        role_id: &RoleId,
        identity: Identity,
        now: DateTime<Utc>,
    ) -> WorkflowResult<Transition> {
        check_shape(run, plan)?;
        if run.is_terminal() {
            return Err(WorkflowError::RunAlreadyTerminal(run.run_id.clone()));
        }
        let idx = plan
            .index_of(step_id)
            .ok_or_else(|| WorkflowError::StepNotFound(step_id.clone()))?;

        let exec = &mut run.steps[idx];
        if exec.status != StepStatus::InProgress {
            return Err(WorkflowError::StepNotActive(step_id.clone()));
        }
        let hold = exec
            .hold
            .as_mut()
            .filter(|hold| hold.roles.contains(role_id))
            .ok_or_else(|| {
                WorkflowError::InvalidTransition(format!(
                    "step {} is not waiting for an assignee for role {}",
                    step_id, role_id
                ))
            })?;
        hold.roles.retain(|r| r != role_id);
        if hold.roles.is_empty() {
            exec.hold = None;
        }
        exec.assigned_to
            .push(Assignment::new(role_id.clone(), identity.clone(), now));

        let notification = Notification::new(
            run.run_id.clone(),
            step_id.clone(),
            identity.email(),
            NotificationKind::Assignment,
        );
        run.record(
            now,
            "step_assigned",
            format!("Step {} assigned to {} as {}", step_id, identity, role_id),
        );

        Ok(Transition {
            notifications: vec![notification],
            ..Transition::default()
        })
    }

    /// Cancel a run; step history stays as it is
    pub fn cancel(&self, run: &mut Run, reason: &str, now: DateTime<Utc>) -> WorkflowResult<()> {
        if run.is_terminal() {
            return Err(WorkflowError::RunAlreadyTerminal(run.run_id.clone()));
        }
        run.cancel(now, reason);
        Ok(())
    }

    pub fn pause(&self, run: &mut Run, reason: &str, now: DateTime<Utc>) -> WorkflowResult<()> {
        if run.is_terminal() {
            return Err(WorkflowError::RunAlreadyTerminal(run.run_id.clone()));
        }
        if run.status != RunStatus::InProgress {
            return Err(WorkflowError::RunNotActive(run.run_id.clone()));
        }
        run.pause(now, reason);
        Ok(())
    }

    pub fn resume(&self, run: &mut Run, now: DateTime<Utc>) -> WorkflowResult<()> {
        if run.status != RunStatus::Paused {
            return Err(WorkflowError::RunNotPaused(run.run_id.clone()));
        }
        run.resume(now);
        Ok(())
    }

    fn pass<'a>(
        &'a self,
        run: &'a mut Run,
        definition: &'a WorkflowDefinition,
        plan: &'a StepPlan,
        now: DateTime<Utc>,
    ) -> Pass<'a> {
        Pass {
            run,
            definition,
            plan,
            resolver: &self.resolver,
            now,
            budget: self.max_automatic_steps,
            limit: self.max_automatic_steps,
            queue: VecDeque::new(),
            transition: Transition::default(),
        }
    }
}

fn check_shape(run: &Run, plan: &StepPlan) -> WorkflowResult<()> {
    if run.steps.len() != plan.len() {
        return Err(WorkflowError::InvalidTransition(format!(
            "run {} has {} step executions but its definition has {} steps",
            run.run_id,
            run.steps.len(),
            plan.len()
        )));
    }
    Ok(())
}

fn due_at(due: RelativeDuration, now: DateTime<Utc>) -> WorkflowResult<DateTime<Utc>> {
    due.after(now).ok_or_else(|| {
        WorkflowError::InvalidTransition(format!(
            "due date {} {:?} after {} is out of range",
            due.amount, due.unit, now
        ))
    })
}

fn ensure_accepts_events(run: &Run) -> WorkflowResult<()> {
    match run.status {
        RunStatus::InProgress => Ok(()),
        RunStatus::Paused => Err(WorkflowError::RunPaused(run.run_id.clone())),
        RunStatus::Completed | RunStatus::Cancelled => {
            Err(WorkflowError::RunAlreadyTerminal(run.run_id.clone()))
        }
    }
}

/// Write the step's declared variables from `resultData.variables`
fn apply_variables(run: &mut Run, step: &Step, result: &Value) {
    let Some(Value::Object(values)) = result.get("variables") else {
        return;
    };
    for key in &step.sets_variables {
        let Some(value) = values.get(key) else {
            continue;
        };
        if run.variables_frozen {
            tracing::debug!(
                run_id = %run.run_id,
                step_id = %step.id,
                key = %key,
                "Ignoring write to frozen flow variable"
            );
            continue;
        }
        run.variable_bindings.insert(key.clone(), value.clone());
    }
}

// ── Transition pass ──────────────────────────────────────────────────

enum Work {
    /// Enter the step at `position` on `path`, or finish the path
    Enter { path: usize, position: usize },
    /// Every step of `path` is done
    PathDone { path: usize },
}

struct Pass<'a> {
    run: &'a mut Run,
    definition: &'a WorkflowDefinition,
    plan: &'a StepPlan,
    resolver: &'a AssigneeResolver,
    now: DateTime<Utc>,
    budget: usize,
    limit: usize,
    queue: VecDeque<Work>,
    transition: Transition,
}

impl<'a> Pass<'a> {
    async fn drive(&mut self) -> WorkflowResult<()> {
        while let Some(work) = self.queue.pop_front() {
            match work {
                Work::Enter { path, position } => self.enter(path, position).await?,
                Work::PathDone { path } => self.path_done(path),
            }
        }
        Ok(())
    }

    fn tick(&mut self) -> WorkflowResult<()> {
        if self.budget == 0 {
            return Err(WorkflowError::InvalidTransition(format!(
                "more than {} automatic steps in one event",
                self.limit
            )));
        }
        self.budget -= 1;
        Ok(())
    }

    // ── Cursors ──────────────────────────────────────────────────────

    fn set_cursor(&mut self, path: usize, position: usize) {
        match self.run.cursors.iter_mut().find(|c| c.path == path) {
            Some(cursor) => cursor.position = position,
            None => self.run.cursors.push(Cursor { path, position }),
        }
        if path == MAIN_PATH {
            if let Some(idx) = self.plan.step_at(MAIN_PATH, position) {
                self.run.current_step_index = idx;
            }
        }
    }

    fn cursor(&self, path: usize) -> Option<Cursor> {
        self.run.cursors.iter().find(|c| c.path == path).copied()
    }

    // ── Entering steps ───────────────────────────────────────────────

    async fn enter(&mut self, path: usize, position: usize) -> WorkflowResult<()> {
        let plan = self.plan;
        let Some(idx) = plan.step_at(path, position) else {
            self.queue.push_back(Work::PathDone { path });
            return Ok(());
        };
        let node = plan.node(idx);
        let now = self.now;

        self.set_cursor(path, position);
        self.run.steps[idx].activate(now);
        self.transition.activated.push(node.step.id.clone());

        match &node.step.kind {
            StepKind::Milestone { milestone_id } => {
                self.tick()?;
                self.run.steps[idx].complete(now);
                self.run.milestones_reached.push(MilestoneRecord {
                    milestone_id: milestone_id.clone(),
                    step_id: node.step.id.clone(),
                    reached_at: now,
                });
                self.run.record(
                    now,
                    "milestone_reached",
                    format!("Milestone {} reached", milestone_id),
                );
                self.transition.completed.push(node.step.id.clone());
                tracing::debug!(
                    run_id = %self.run.run_id,
                    milestone = %milestone_id,
                    "Milestone reached"
                );
                self.queue.push_back(Work::Enter {
                    path,
                    position: position + 1,
                });
            }
            StepKind::Goto { target } => {
                self.tick()?;
                self.run.steps[idx].complete(now);
                self.run
                    .record(now, "goto", format!("Step {} jumps to {}", node.step.id, target));
                self.transition.completed.push(node.step.id.clone());
                self.jump(idx, target)?;
            }
            StepKind::Branch { .. } => {
                self.tick()?;
                if node.child_paths.is_empty() {
                    self.run.steps[idx].complete(now);
                    self.transition.completed.push(node.step.id.clone());
                    self.queue.push_back(Work::Enter {
                        path,
                        position: position + 1,
                    });
                    return Ok(());
                }
                for &child in &node.child_paths {
                    self.set_cursor(child, 0);
                }
                for &child in &node.child_paths {
                    self.queue.push_back(Work::Enter {
                        path: child,
                        position: 0,
                    });
                }
                self.run.record(
                    now,
                    "branch_opened",
                    format!("Branch {} opened {} paths", node.step.id, node.child_paths.len()),
                );
            }
            StepKind::Form
            | StepKind::Approval
            | StepKind::Task
            | StepKind::FileRequest
            | StepKind::ESign
            | StepKind::Decision { .. } => self.activate_human(idx).await?,
        }
        Ok(())
    }

    /// Bind owners and a due date to a step that waits for people
    async fn activate_human(&mut self, idx: usize) -> WorkflowResult<()> {
        let plan = self.plan;
        let definition = self.definition;
        let step = &plan.node(idx).step;
        let now = self.now;
        let ctx = RunContext::from_run(self.run);

        let mut assignments = Vec::new();
        let mut held = Vec::new();
        let mut reasons = Vec::new();
        for role_id in step.assignees.roles() {
            let Some(role) = definition.role(role_id) else {
                held.push(role_id.clone());
                reasons.push(format!("role {} is not declared", role_id));
                continue;
            };
            match self.resolver.resolve(role, &ctx).await {
                Ok(identity) => assignments.push(Assignment::new(role_id.clone(), identity, now)),
                Err(WorkflowError::UnresolvableAssignee { role_id, reason }) => {
                    held.push(role_id);
                    reasons.push(reason);
                }
                Err(other) => return Err(other),
            }
        }

        for assignment in &assignments {
            self.transition.notifications.push(Notification::new(
                self.run.run_id.clone(),
                step.id.clone(),
                assignment.identity.email(),
                NotificationKind::Assignment,
            ));
        }

        let due = step.due.map(|due| due_at(due, now)).transpose()?;
        let exec = &mut self.run.steps[idx];
        exec.due_at = due;
        exec.assigned_to = assignments;

        if held.is_empty() {
            tracing::debug!(run_id = %self.run.run_id, step_id = %step.id, "Step activated");
            return Ok(());
        }

        let reason = reasons.join("; ");
        exec.hold = Some(AssignmentHold {
            roles: held,
            reason: reason.clone(),
            since: now,
        });
        self.run.record(
            now,
            "assignment_held",
            format!("Step {} is waiting for an assignee: {}", step.id, reason),
        );
        tracing::warn!(
            run_id = %self.run.run_id,
            step_id = %step.id,
            reason = %reason,
            "Step held: assignee could not be resolved"
        );
        Ok(())
    }

    // ── Leaving paths ────────────────────────────────────────────────

    fn path_done(&mut self, path: usize) {
        self.run.cursors.retain(|c| c.path != path);
        if path == MAIN_PATH {
            self.finish_run();
            return;
        }

        let plan = self.plan;
        let Some(container) = plan.path(path).container else {
            return;
        };
        let node = plan.node(container);
        if node.child_paths.iter().any(|p| self.cursor(*p).is_some()) {
            return;
        }
        if self.run.steps[container].status != StepStatus::InProgress {
            return;
        }

        let now = self.now;
        self.run.steps[container].complete(now);
        self.run
            .record(now, "branch_joined", format!("Branch {} joined", node.step.id));
        self.transition.completed.push(node.step.id.clone());
        self.queue.push_back(Work::Enter {
            path: node.path,
            position: node.position + 1,
        });
    }

    fn finish_run(&mut self) {
        let now = self.now;
        for exec in &mut self.run.steps {
            if exec.status == StepStatus::Pending {
                exec.skip(now);
            }
        }
        self.run.complete(now);
        self.queue.clear();
        self.transition.run_completed = true;
        tracing::info!(run_id = %self.run.run_id, "Run completed");
    }

    // ── Jumps ────────────────────────────────────────────────────────

    /// Continue at a decision target: strictly forward on the same path
    fn route_forward(&mut self, from: usize, target: &StepId) -> WorkflowResult<()> {
        let plan = self.plan;
        let from = plan.node(from);
        let to = plan
            .get(target)
            .filter(|to| to.path == from.path && to.position > from.position)
            .ok_or_else(|| {
                WorkflowError::InvalidTransition(format!(
                    "step {} cannot route to {}",
                    from.step.id, target
                ))
            })?;

        self.skip_between(from.path, from.position + 1, to.position);
        self.queue.push_back(Work::Enter {
            path: to.path,
            position: to.position,
        });
        Ok(())
    }

    /// Follow a goto: within its own path, or out of every branch to the
    /// main path
    fn jump(&mut self, from: usize, target: &StepId) -> WorkflowResult<()> {
        let plan = self.plan;
        let from = plan.node(from);
        let to = plan.get(target).ok_or_else(|| {
            WorkflowError::InvalidTransition(format!(
                "goto {} targets unknown step {}",
                from.step.id, target
            ))
        })?;

        if to.path == from.path {
            if to.position > from.position {
                self.skip_between(from.path, from.position + 1, to.position);
            }
        } else if to.path == MAIN_PATH {
            let main_position = self.cursor(MAIN_PATH).map_or(0, |c| c.position);
            self.abandon_branches();
            if to.position > main_position {
                self.skip_between(MAIN_PATH, main_position + 1, to.position);
            }
            self.queue.clear();
        } else {
            return Err(WorkflowError::InvalidTransition(format!(
                "goto {} cannot reach {} from its path",
                from.step.id, target
            )));
        }

        self.queue.push_back(Work::Enter {
            path: to.path,
            position: to.position,
        });
        Ok(())
    }

    /// Close every open path: in-progress steps at each cursor become
    /// skipped and only the main cursor survives
    fn abandon_branches(&mut self) {
        let plan = self.plan;
        let now = self.now;
        let open: Vec<Cursor> = self.run.cursors.clone();
        for cursor in open {
            if let Some(idx) = plan.step_at(cursor.path, cursor.position) {
                let exec = &mut self.run.steps[idx];
                if exec.status == StepStatus::InProgress {
                    exec.skip(now);
                }
            }
        }
        self.run.cursors.retain(|c| c.path == MAIN_PATH);
        self.run.record(now, "branches_abandoned", "Open branches abandoned by goto");
    }

    /// Skip positions `from..to` of a path, including everything nested
    /// in skipped branch containers
    fn skip_between(&mut self, path: usize, from: usize, to: usize) {
        let plan = self.plan;
        for position in from..to {
            let Some(idx) = plan.step_at(path, position) else {
                break;
            };
            self.skip_step(idx);
            for nested in plan.descendant_paths(idx) {
                for &nested_idx in &plan.path(nested).steps {
                    self.skip_step(nested_idx);
                }
            }
        }
    }

    fn skip_step(&mut self, idx: usize) {
        let exec = &mut self.run.steps[idx];
        if matches!(exec.status, StepStatus::Completed | StepStatus::Skipped) {
            exec.begin_attempt();
        }
        exec.skip(self.now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryWorkflowStore;
    use serde_json::json;
    use std::sync::Arc;

    fn machine() -> StateMachine {
        StateMachine::new(
            AssigneeResolver::new(Arc::new(InMemoryWorkflowStore::new())),
            1000,
        )
    }

    fn ops_def() -> WorkflowDefinition {
        WorkflowDefinition::new("Test")
            .with_id("test")
            .with_role(Role::new("ops", "Ops", Resolution::fixed("ops@acme.test")))
    }

    async fn start(def: &WorkflowDefinition) -> (Run, StepPlan) {
        let plan = StepPlan::build(def);
        let now = Utc::now();
        let mut run = Run::new(
            def.id.clone(),
            def.version,
            Identity::user("u1", "ana@acme.test"),
            plan.step_ids(),
            now,
        );
        let kickoff = KickoffData::new(run.initiator.clone());
        machine()
            .start(&mut run, def, &plan, kickoff, now)
            .await
            .unwrap();
        (run, plan)
    }

    fn status(run: &Run, step: &str) -> StepStatus {
        run.step(&StepId::new(step)).unwrap().status
    }

    #[tokio::test]
    async fn test_start_activates_first_step_after_markers() {
        let def = ops_def()
            .with_milestone(Milestone::new("kickoff", "Kickoff", 1))
            .with_step(Step::milestone("m", "kickoff"))
            .with_step(Step::task("a", "A").assigned_to("ops").due_in(RelativeDuration::days(2)));
        let (run, _) = start(&def).await;

        assert_eq!(status(&run, "m"), StepStatus::Completed);
        assert_eq!(status(&run, "a"), StepStatus::InProgress);
        assert!(run.has_reached(&MilestoneId::new("kickoff")));
        assert_eq!(run.current_step_index, 1);
        let a = run.step(&StepId::new("a")).unwrap();
        assert_eq!(a.assigned_to[0].identity.email(), "ops@acme.test");
        assert!(a.due_at.is_some());
    }

    #[tokio::test]
    async fn test_out_of_range_due_is_rejected() {
        let definitions = [
            ops_def()
                .with_due(RelativeDuration::weeks(u32::MAX))
                .with_step(Step::task("a", "A").assigned_to("ops")),
            ops_def().with_step(
                Step::task("a", "A")
                    .assigned_to("ops")
                    .due_in(RelativeDuration::weeks(u32::MAX)),
            ),
        ];

        for def in &definitions {
            let plan = StepPlan::build(def);
            let now = Utc::now();
            let mut run = Run::new(
                def.id.clone(),
                def.version,
                Identity::user("u1", "ana@acme.test"),
                plan.step_ids(),
                now,
            );
            let kickoff = KickoffData::new(run.initiator.clone());
            let err = machine()
                .start(&mut run, def, &plan, kickoff, now)
                .await
                .unwrap_err();
            assert_eq!(err.code(), "INVALID_TRANSITION");
        }
    }

    #[tokio::test]
    async fn test_sequential_completion() {
        let def = ops_def()
            .with_step(Step::task("a", "A").assigned_to("ops"))
            .with_step(Step::task("b", "B").assigned_to("ops"));
        let (mut run, plan) = start(&def).await;
        let m = machine();

        let t = m
            .complete_step(&mut run, &def, &plan, &StepCompletion::new("a", json!({})), Utc::now())
            .await
            .unwrap();
        assert_eq!(t.activated, vec![StepId::new("b")]);
        assert_eq!(run.current_step_index, 1);

        let t = m
            .complete_step(&mut run, &def, &plan, &StepCompletion::new("b", json!({})), Utc::now())
            .await
            .unwrap();
        assert!(t.run_completed);
        assert_eq!(run.status, RunStatus::Completed);
        assert!(run.cursors.is_empty());
    }

    #[tokio::test]
    async fn test_decision_skips_over_steps() {
        let def = ops_def()
            .with_step(
                Step::decision(
                    "d",
                    "D",
                    vec![DecisionOutcome::to("fast", "c"), DecisionOutcome::new("slow")],
                )
                .assigned_to("ops"),
            )
            .with_step(Step::task("b", "B").assigned_to("ops"))
            .with_step(Step::task("c", "C").assigned_to("ops"));
        let (mut run, plan) = start(&def).await;

        machine()
            .complete_step(&mut run, &def, &plan, &StepCompletion::outcome("d", "fast"), Utc::now())
            .await
            .unwrap();
        assert_eq!(status(&run, "b"), StepStatus::Skipped);
        assert_eq!(status(&run, "c"), StepStatus::InProgress);
        assert_eq!(run.step(&StepId::new("d")).unwrap().outcome.as_deref(), Some("fast"));
    }

    #[tokio::test]
    async fn test_branch_in_branch_joins_inside_out() {
        let task = |id: &str| Step::task(id, id).assigned_to("ops");
        let def = ops_def()
            .with_step(Step::branch(
                "outer",
                "Outer",
                vec![
                    BranchPath::new(
                        "left",
                        vec![Step::branch(
                            "inner",
                            "Inner",
                            vec![
                                BranchPath::new("x", vec![task("x1")]),
                                BranchPath::new("y", vec![task("y1")]),
                            ],
                        )],
                    ),
                    BranchPath::new("right", vec![task("r1")]),
                ],
            ))
            .with_step(task("after"));
        let (mut run, plan) = start(&def).await;
        let m = machine();
        assert_eq!(run.active_steps().len(), 5);

        for id in ["x1", "r1"] {
            m.complete_step(&mut run, &def, &plan, &StepCompletion::new(id, json!({})), Utc::now())
                .await
                .unwrap();
        }
        assert_eq!(status(&run, "inner"), StepStatus::InProgress);
        assert_eq!(status(&run, "after"), StepStatus::Pending);

        let t = m
            .complete_step(&mut run, &def, &plan, &StepCompletion::new("y1", json!({})), Utc::now())
            .await
            .unwrap();
        assert_eq!(
            t.completed,
            vec![StepId::new("y1"), StepId::new("inner"), StepId::new("outer")]
        );
        assert_eq!(status(&run, "after"), StepStatus::InProgress);
        assert_eq!(run.cursors, vec![Cursor { path: MAIN_PATH, position: 1 }]);
    }

    #[tokio::test]
    async fn test_goto_loop_hits_budget() {
        let mut def = ops_def()
            .with_milestone(Milestone::new("m", "M", 1))
            .with_step(Step::milestone("marker", "m"))
            .with_step(Step::goto("again", "marker"));
        def.constraints = Constraints::permissive();
        let plan = StepPlan::build(&def);
        let now = Utc::now();
        let mut run = Run::new(def.id.clone(), 1, Identity::contact("a@acme.test"), plan.step_ids(), now);

        let err = StateMachine::new(
            AssigneeResolver::new(Arc::new(InMemoryWorkflowStore::new())),
            50,
        )
        .start(&mut run, &def, &plan, KickoffData::new(Identity::contact("a@acme.test")), now)
        .await
        .unwrap_err();
        assert_eq!(err.code(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_required_variable_must_be_bound() {
        let def = ops_def()
            .with_variable(FlowVariable::new("owner", VariableType::Email).required())
            .with_step(Step::task("a", "A").assigned_to("ops"));
        let plan = StepPlan::build(&def);
        let now = Utc::now();
        let initiator = Identity::contact("a@acme.test");
        let mut run = Run::new(def.id.clone(), 1, initiator.clone(), plan.step_ids(), now);

        let err = machine()
            .start(&mut run, &def, &plan, KickoffData::new(initiator.clone()), now)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("owner"));

        let err = machine()
            .start(
                &mut run,
                &def,
                &plan,
                KickoffData::new(initiator).with_variable("stray", json!("x")),
                now,
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("stray"));
    }

    #[tokio::test]
    async fn test_step_variables_respect_freeze() {
        let mut def = ops_def()
            .with_variable(FlowVariable::new("region", VariableType::Text))
            .with_step(Step::task("a", "A").assigned_to("ops").sets_variable("region"))
            .with_step(Step::task("b", "B").assigned_to("ops"));
        def.constraints.variables_set_only_at_initiation = false;
        let (mut run, plan) = start(&def).await;
        assert!(!run.variables_frozen);

        machine()
            .complete_step(
                &mut run,
                &def,
                &plan,
                &StepCompletion::new("a", json!({ "variables": { "region": "EU", "other": 1 } })),
                Utc::now(),
            )
            .await
            .unwrap();
        assert_eq!(run.variable_bindings.get("region"), Some(&json!("EU")));
        assert!(!run.variable_bindings.contains_key("other"));
    }

    #[tokio::test]
    async fn test_pause_and_resume_rules() {
        let def = ops_def().with_step(Step::task("a", "A").assigned_to("ops"));
        let (mut run, plan) = start(&def).await;
        let m = machine();
        let now = Utc::now();

        assert_eq!(m.resume(&mut run, now).unwrap_err().code(), "RUN_NOT_PAUSED");
        m.pause(&mut run, "vendor delay", now).unwrap();
        assert_eq!(m.pause(&mut run, "again", now).unwrap_err().code(), "RUN_NOT_ACTIVE");

        let err = m
            .complete_step(&mut run, &def, &plan, &StepCompletion::new("a", json!({})), now)
            .await
            .unwrap_err();
        assert_eq!(err.code(), "RUN_PAUSED");

        m.resume(&mut run, now).unwrap();
        m.cancel(&mut run, "done", now).unwrap();
        assert_eq!(m.cancel(&mut run, "again", now).unwrap_err().code(), "RUN_ALREADY_TERMINAL");
    }
}
