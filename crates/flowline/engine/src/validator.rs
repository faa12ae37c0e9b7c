//! Definition validator: structural checks against platform constraints
//!
//! Validation is a pure function over the definition graph. It never
//! mutates the definition and reports issues in a stable order: definition
//! level first, then roles, then steps in plan order, then milestones.

use crate::plan::{StepPlan, MAIN_PATH};
use flowline_types::*;
use std::collections::HashSet;

/// Validate a definition against the given constraints
pub fn validate_definition(
    definition: &WorkflowDefinition,
    constraints: &Constraints,
) -> ValidationResult {
    let plan = StepPlan::build(definition);
    let mut checker = Checker {
        definition,
        constraints,
        plan: &plan,
        issues: Vec::new(),
    };
    checker.check_definition();
    checker.check_variables();
    checker.check_roles();
    checker.check_steps();
    checker.check_milestones();
    ValidationResult::from_issues(checker.issues)
}

struct Checker<'a> {
    definition: &'a WorkflowDefinition,
    constraints: &'a Constraints,
    plan: &'a StepPlan,
    issues: Vec<ValidationIssue>,
}

impl<'a> Checker<'a> {
    fn report(&mut self, path: impl Into<String>, rule: ValidationRule, message: impl Into<String>) {
        self.issues.push(ValidationIssue::new(path, rule, message));
    }

    // ── Definition level ─────────────────────────────────────────────

    fn check_definition(&mut self) {
        if self.definition.steps.is_empty() {
            self.report(
                "steps",
                ValidationRule::EmptyDefinition,
                "Definition has no steps",
            );
        }

        let plan = self.plan;
        let mut seen = HashSet::new();
        for node in plan.nodes() {
            if !seen.insert(&node.step.id) {
                self.report(
                    format!("{}.id", node.location),
                    ValidationRule::DuplicateStepId,
                    format!("Step id '{}' is used more than once", node.step.id),
                );
            }
        }

        let definition = self.definition;
        self.check_due("due".to_string(), "Definition", definition.due);
    }

    fn check_due(&mut self, path: String, owner: &str, due: Option<RelativeDuration>) {
        let Some(due) = due else {
            return;
        };
        if !due.is_within_limit() {
            self.report(
                path,
                ValidationRule::DueDuration,
                format!(
                    "{} is due after {} {:?}, more than {} days",
                    owner,
                    due.amount,
                    due.unit,
                    RelativeDuration::MAX_DAYS
                ),
            );
        }
    }

    fn check_variables(&mut self) {
        let definition = self.definition;
        let mut seen = HashSet::new();
        for (i, variable) in definition.variables.iter().enumerate() {
            if !seen.insert(variable.key.as_str()) {
                self.report(
                    format!("variables[{}].key", i),
                    ValidationRule::DuplicateVariableKey,
                    format!("Flow variable '{}' is declared more than once", variable.key),
                );
            }
            if !self
                .constraints
                .allowed_variable_types
                .contains(&variable.variable_type)
            {
                self.report(
                    format!("variables[{}].type", i),
                    ValidationRule::VariableTypeNotAllowed,
                    format!(
                        "Flow variable '{}' has type {:?}, which is not allowed",
                        variable.key, variable.variable_type
                    ),
                );
            }
        }
    }

    // ── Roles ────────────────────────────────────────────────────────

    fn check_roles(&mut self) {
        let definition = self.definition;
        let mut seen = HashSet::new();
        for (i, role) in definition.roles.iter().enumerate() {
            if !seen.insert(&role.role_id) {
                self.report(
                    format!("roles[{}].roleId", i),
                    ValidationRule::DuplicateRoleId,
                    format!("Role id '{}' is declared more than once", role.role_id),
                );
            }

            let path = format!("roles[{}].resolution", i);
            match &role.resolution {
                Resolution::FlowVariable { key } => match definition.variable(key) {
                    None => self.report(
                        path,
                        ValidationRule::UnknownVariable,
                        format!("Role '{}' reads undeclared flow variable '{}'", role.role_id, key),
                    ),
                    Some(variable) if !variable.variable_type.identifies_person() => self.report(
                        path,
                        ValidationRule::AssigneeVariableType,
                        format!(
                            "Role '{}' is resolved from '{}', which is not an email or user variable",
                            role.role_id, key
                        ),
                    ),
                    Some(_) => {}
                },
                Resolution::Rules {
                    source, default, ..
                } => {
                    if let RuleSource::FlowVariable { key } = source {
                        if definition.variable(key).is_none() {
                            self.report(
                                format!("{}.source", path),
                                ValidationRule::UnknownVariable,
                                format!(
                                    "Role '{}' matches rules against undeclared flow variable '{}'",
                                    role.role_id, key
                                ),
                            );
                        }
                    }
                    if default.trim().is_empty() {
                        self.report(
                            format!("{}.default", path),
                            ValidationRule::EmptyRuleDefault,
                            format!("Role '{}' has rules without a default", role.role_id),
                        );
                    }
                }
                Resolution::RoundRobin { emails } if emails.is_empty() => self.report(
                    format!("{}.emails", path),
                    ValidationRule::EmptyRoundRobin,
                    format!("Role '{}' rotates over an empty list", role.role_id),
                ),
                Resolution::RoundRobin { .. }
                | Resolution::FixedContact { .. }
                | Resolution::WorkspaceInitializer
                | Resolution::KickoffFormField { .. } => {}
            }
        }
    }

    // ── Steps ────────────────────────────────────────────────────────

    fn check_steps(&mut self) {
        let plan = self.plan;
        for idx in 0..plan.len() {
            self.check_assignees(idx);
            self.check_sets_variables(idx);

            let node = plan.node(idx);
            self.check_due(
                format!("{}.due", node.location),
                &format!("Step '{}'", node.step.id),
                node.step.due,
            );
            match &node.step.kind {
                StepKind::Decision { outcomes } => self.check_decision(idx, outcomes),
                StepKind::Branch { paths } => self.check_branch(idx, paths),
                StepKind::Milestone { milestone_id } => self.check_marker(idx, milestone_id),
                StepKind::Goto { target } => self.check_goto(idx, target),
                StepKind::Form
                | StepKind::Approval
                | StepKind::Task
                | StepKind::FileRequest
                | StepKind::ESign => {}
            }
        }
    }

    fn check_assignees(&mut self, idx: usize) {
        let plan = self.plan;
        let node = plan.node(idx);
        let step = &node.step;
        let path = format!("{}.assignees", node.location);
        let roles = step.assignees.roles();

        if step.is_system() {
            return;
        }

        if roles.is_empty() {
            self.report(
                path,
                ValidationRule::MissingAssignee,
                format!("Step '{}' has no assignee", step.id),
            );
            return;
        }

        let definition = self.definition;
        for role in roles {
            if definition.role(role).is_none() {
                self.report(
                    path.clone(),
                    ValidationRule::UnknownRole,
                    format!("Step '{}' is assigned to undeclared role '{}'", step.id, role),
                );
            }
        }

        if roles.len() == 1 && step.completion_policy != CompletionPolicy::AnyOne {
            self.report(
                format!("{}.completionPolicy", node.location),
                ValidationRule::SingleAssigneePolicy,
                format!(
                    "Step '{}' has a single assignee; its {:?} policy behaves like any-one",
                    step.id, step.completion_policy
                ),
            );
        }
    }

    fn check_sets_variables(&mut self, idx: usize) {
        let plan = self.plan;
        let node = plan.node(idx);
        if node.step.sets_variables.is_empty() {
            return;
        }
        let path = format!("{}.setsVariables", node.location);

        if self.constraints.variables_set_only_at_initiation {
            self.report(
                path.clone(),
                ValidationRule::VariableSetAfterKickoff,
                format!(
                    "Step '{}' sets flow variables, but variables are fixed at kickoff",
                    node.step.id
                ),
            );
        }

        for key in &node.step.sets_variables {
            if self.definition.variable(key).is_none() {
                self.report(
                    path.clone(),
                    ValidationRule::UnknownVariable,
                    format!("Step '{}' sets undeclared flow variable '{}'", node.step.id, key),
                );
            }
        }
    }

    fn check_decision(&mut self, idx: usize, outcomes: &[DecisionOutcome]) {
        let plan = self.plan;
        let node = plan.node(idx);
        let path = format!("{}.outcomes", node.location);

        if outcomes.is_empty() {
            self.report(
                path.clone(),
                ValidationRule::DecisionTooFewOutcomes,
                format!("Decision '{}' has no outcomes", node.step.id),
            );
        }
        if outcomes.len() > self.constraints.max_decision_outcomes {
            self.report(
                path.clone(),
                ValidationRule::DecisionOutcomeCount,
                format!(
                    "Decision '{}' has {} outcomes; at most {} are allowed",
                    node.step.id,
                    outcomes.len(),
                    self.constraints.max_decision_outcomes
                ),
            );
        }

        let mut keys = HashSet::new();
        for (i, outcome) in outcomes.iter().enumerate() {
            if !keys.insert(outcome.key.as_str()) {
                self.report(
                    format!("{}[{}].key", path, i),
                    ValidationRule::DuplicateOutcome,
                    format!("Decision '{}' repeats outcome '{}'", node.step.id, outcome.key),
                );
            }

            let Some(target) = &outcome.target else {
                continue;
            };
            let target_path = format!("{}[{}].target", path, i);
            match plan.get(target) {
                None => self.report(
                    target_path,
                    ValidationRule::DecisionTarget,
                    format!("Outcome '{}' targets unknown step '{}'", outcome.key, target),
                ),
                Some(t) if t.path != node.path || t.position <= node.position => self.report(
                    target_path,
                    ValidationRule::DecisionTarget,
                    format!(
                        "Outcome '{}' must target a later step on the same path as '{}'",
                        outcome.key, node.step.id
                    ),
                ),
                Some(_) => {}
            }
        }
    }

    fn check_branch(&mut self, idx: usize, paths: &[BranchPath]) {
        let plan = self.plan;
        let node = plan.node(idx);

        if paths.is_empty() {
            self.report(
                format!("{}.paths", node.location),
                ValidationRule::EmptyBranch,
                format!("Branch '{}' has no paths", node.step.id),
            );
        }
        for (i, path) in paths.iter().enumerate() {
            if path.steps.is_empty() {
                self.report(
                    format!("{}.paths[{}]", node.location, i),
                    ValidationRule::EmptyBranch,
                    format!("Path '{}' of branch '{}' has no steps", path.name, node.step.id),
                );
            }
        }

        if paths.len() > self.constraints.max_parallel_branches {
            self.report(
                format!("{}.paths", node.location),
                ValidationRule::BranchCount,
                format!(
                    "Branch '{}' opens {} paths; at most {} are allowed",
                    node.step.id,
                    paths.len(),
                    self.constraints.max_parallel_branches
                ),
            );
        }

        if node.depth + 1 > self.constraints.max_branch_nesting_depth {
            self.report(
                node.location.clone(),
                ValidationRule::BranchNestingDepth,
                format!(
                    "Branch '{}' is nested {} deep; at most {} is allowed",
                    node.step.id,
                    node.depth + 1,
                    self.constraints.max_branch_nesting_depth
                ),
            );
        }
    }

    fn check_marker(&mut self, idx: usize, milestone_id: &MilestoneId) {
        let plan = self.plan;
        let node = plan.node(idx);
        let path = format!("{}.milestoneId", node.location);

        let definition = self.definition;
        if definition.milestone(milestone_id).is_none() {
            self.report(
                path.clone(),
                ValidationRule::UnknownMilestone,
                format!("Marker '{}' references unknown milestone '{}'", node.step.id, milestone_id),
            );
        }

        if node.depth == 0 {
            return;
        }
        if !self.constraints.milestones_inside_branches_allowed {
            self.report(
                node.location.clone(),
                ValidationRule::MilestoneInBranch,
                format!("Milestone marker '{}' is inside a branch", node.step.id),
            );
        }
        if self.constraints.branch_must_fit_single_milestone {
            self.report(
                node.location.clone(),
                ValidationRule::BranchSpansMilestones,
                format!(
                    "Marker '{}' splits its branch across milestones",
                    node.step.id
                ),
            );
        }
    }

    fn check_goto(&mut self, idx: usize, target: &StepId) {
        let plan = self.plan;
        let node = plan.node(idx);
        let path = format!("{}.target", node.location);

        let Some(t) = plan.get(target) else {
            self.report(
                path,
                ValidationRule::GotoTarget,
                format!("Goto '{}' targets unknown step '{}'", node.step.id, target),
            );
            return;
        };

        if &node.step.id == target {
            self.report(
                path,
                ValidationRule::GotoTarget,
                format!("Goto '{}' targets itself", node.step.id),
            );
            return;
        }

        if t.path != node.path && t.path != MAIN_PATH {
            self.report(
                path.clone(),
                ValidationRule::GotoTarget,
                format!(
                    "Goto '{}' must target a step on its own path or the main path",
                    node.step.id
                ),
            );
        }

        if self.constraints.goto_targets_main_path_only && t.path != MAIN_PATH {
            self.report(
                path,
                ValidationRule::GotoMainPathOnly,
                format!("Goto '{}' must target a main-path step", node.step.id),
            );
        }
    }

    // ── Milestones ───────────────────────────────────────────────────

    fn check_milestones(&mut self) {
        let plan = self.plan;
        let definition = self.definition;
        let mut placed = HashSet::new();
        let mut last_sequence: Option<u32> = None;

        for node in plan.nodes() {
            let StepKind::Milestone { milestone_id } = &node.step.kind else {
                continue;
            };
            placed.insert(milestone_id);

            if node.path != MAIN_PATH {
                continue;
            }
            let Some(milestone) = definition.milestone(milestone_id) else {
                continue;
            };
            if let Some(previous) = last_sequence {
                if milestone.sequence <= previous {
                    self.issues.push(ValidationIssue::new(
                        format!("{}.milestoneId", node.location),
                        ValidationRule::MilestoneOrder,
                        format!(
                            "Milestone '{}' (sequence {}) is placed after sequence {}",
                            milestone_id, milestone.sequence, previous
                        ),
                    ));
                }
            }
            last_sequence = Some(milestone.sequence);
        }

        for (i, milestone) in definition.milestones.iter().enumerate() {
            if !placed.contains(&milestone.id) {
                self.issues.push(ValidationIssue::new(
                    format!("milestones[{}]", i),
                    ValidationRule::UnusedMilestone,
                    format!("Milestone '{}' is never placed", milestone.id),
                ));
            }
        }
    }
}
