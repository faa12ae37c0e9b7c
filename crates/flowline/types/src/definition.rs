//! Workflow definitions: the blueprint every run is cloned from
//!
//! A definition is an ordered main path of [`Step`]s. Branch containers
//! hold further paths, so the step list is a tree; the engine flattens it
//! into an arena before running anything.
//!
//! Definitions are immutable once published. To change one, save a new
//! version.

use crate::RoleId;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ── Identifiers ──────────────────────────────────────────────────────

/// Unique identifier for a workflow definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefinitionId(pub String);

impl DefinitionId {
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a step, unique within its definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StepId(pub String);

impl StepId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for StepId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of a milestone, unique within its definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MilestoneId(pub String);

impl MilestoneId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for MilestoneId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ── Workflow Definition ──────────────────────────────────────────────

/// A workflow template
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    /// Unique identifier
    pub id: DefinitionId,
    /// Human-readable name
    pub name: String,
    /// Description of what this workflow accomplishes
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// Version for tracking definition evolution
    #[serde(default = "default_version")]
    pub version: u32,
    /// The main path, in order
    pub steps: Vec<Step>,
    /// Named checkpoints placed on the path with milestone markers
    #[serde(default)]
    pub milestones: Vec<Milestone>,
    /// Role placeholders referenced by step assignees
    #[serde(default)]
    pub roles: Vec<crate::Role>,
    /// Flow variables runs may bind
    #[serde(default)]
    pub variables: Vec<FlowVariable>,
    /// Platform constraints this template was authored against
    #[serde(default)]
    pub constraints: Constraints,
    /// Due duration for the whole run, anchored at run start
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<RelativeDuration>,
    /// When this definition was created
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Metadata
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, String>,
}

fn default_version() -> u32 {
    1
}

impl WorkflowDefinition {
    /// Create an empty definition with a generated id
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: DefinitionId::generate(),
            name: name.into(),
            description: String::new(),
            version: 1,
            steps: Vec::new(),
            milestones: Vec::new(),
            roles: Vec::new(),
            variables: Vec::new(),
            constraints: Constraints::default(),
            due: None,
            created_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = DefinitionId::new(id);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    pub fn with_step(mut self, step: Step) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_milestone(mut self, milestone: Milestone) -> Self {
        self.milestones.push(milestone);
        self
    }

    pub fn with_role(mut self, role: crate::Role) -> Self {
        self.roles.push(role);
        self
    }

    pub fn with_variable(mut self, variable: FlowVariable) -> Self {
        self.variables.push(variable);
        self
    }

    pub fn with_constraints(mut self, constraints: Constraints) -> Self {
        self.constraints = constraints;
        self
    }

    pub fn with_due(mut self, due: RelativeDuration) -> Self {
        self.due = Some(due);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Look up a declared role
    pub fn role(&self, id: &RoleId) -> Option<&crate::Role> {
        self.roles.iter().find(|r| &r.role_id == id)
    }

    /// Look up a declared flow variable
    pub fn variable(&self, key: &str) -> Option<&FlowVariable> {
        self.variables.iter().find(|v| v.key == key)
    }

    /// Look up a declared milestone
    pub fn milestone(&self, id: &MilestoneId) -> Option<&Milestone> {
        self.milestones.iter().find(|m| &m.id == id)
    }

    /// Total number of steps, including those nested in branches
    pub fn step_count(&self) -> usize {
        fn count(steps: &[Step]) -> usize {
            steps
                .iter()
                .map(|s| match &s.kind {
                    StepKind::Branch { paths } => {
                        1 + paths.iter().map(|p| count(&p.steps)).sum::<usize>()
                    }
                    _ => 1,
                })
                .sum()
        }
        count(&self.steps)
    }
}

// ── Step ─────────────────────────────────────────────────────────────

/// A step on a path
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    /// Unique identifier within the definition
    pub id: StepId,
    /// Human-readable name
    pub name: String,
    /// Step type and its type-specific configuration
    #[serde(flatten)]
    pub kind: StepKind,
    /// Roles that own this step
    #[serde(default)]
    pub assignees: AssigneeRef,
    /// How many assignees must respond before the step completes
    #[serde(default)]
    pub completion_policy: CompletionPolicy,
    /// Due duration anchored at activation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due: Option<RelativeDuration>,
    /// Who hears about it when the step is escalated
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalate_to: Option<String>,
    /// Flow variables this step may write through its result data
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sets_variables: Vec<String>,
}

impl Step {
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: StepId::new(id),
            name: name.into(),
            kind,
            assignees: AssigneeRef::default(),
            completion_policy: CompletionPolicy::default(),
            due: None,
            escalate_to: None,
            sets_variables: Vec::new(),
        }
    }

    pub fn form(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, StepKind::Form)
    }

    pub fn task(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, StepKind::Task)
    }

    pub fn approval(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self::new(id, name, StepKind::Approval)
    }

    pub fn decision(
        id: impl Into<String>,
        name: impl Into<String>,
        outcomes: Vec<DecisionOutcome>,
    ) -> Self {
        Self::new(id, name, StepKind::Decision { outcomes })
    }

    pub fn milestone(id: impl Into<String>, milestone: impl Into<String>) -> Self {
        Self::new(
            id,
            "Milestone",
            StepKind::Milestone {
                milestone_id: MilestoneId::new(milestone),
            },
        )
    }

    pub fn branch(id: impl Into<String>, name: impl Into<String>, paths: Vec<BranchPath>) -> Self {
        Self::new(id, name, StepKind::Branch { paths })
    }

    pub fn goto(id: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            id,
            "Go to",
            StepKind::Goto {
                target: StepId::new(target),
            },
        )
    }

    pub fn assigned_to(mut self, role: impl Into<String>) -> Self {
        self.assignees = AssigneeRef::Role(RoleId::new(role));
        self
    }

    pub fn assigned_to_all(mut self, roles: &[&str]) -> Self {
        self.assignees = AssigneeRef::Roles(roles.iter().map(|r| RoleId::new(*r)).collect());
        self
    }

    pub fn with_policy(mut self, policy: CompletionPolicy) -> Self {
        self.completion_policy = policy;
        self
    }

    pub fn due_in(mut self, due: RelativeDuration) -> Self {
        self.due = Some(due);
        self
    }

    pub fn escalate_to(mut self, email: impl Into<String>) -> Self {
        self.escalate_to = Some(email.into());
        self
    }

    pub fn sets_variable(mut self, key: impl Into<String>) -> Self {
        self.sets_variables.push(key.into());
        self
    }

    /// System steps are processed by the engine on entry and never
    /// wait for an external completion event.
    pub fn is_system(&self) -> bool {
        self.kind.is_system()
    }
}

/// Step type with its type-specific configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepKind {
    /// Someone fills in a form
    Form,
    /// Someone approves or rejects
    Approval,
    /// A plain to-do
    Task,
    /// Someone uploads files
    FileRequest,
    /// Someone signs a document
    ESign,
    /// Someone picks one of the declared outcomes
    Decision { outcomes: Vec<DecisionOutcome> },
    /// Marks that the run reached a milestone
    Milestone {
        #[serde(rename = "milestoneId")]
        milestone_id: MilestoneId,
    },
    /// Opens parallel paths that fan back in before the next step
    Branch { paths: Vec<BranchPath> },
    /// Jumps to another step
    Goto { target: StepId },
}

impl StepKind {
    pub fn is_system(&self) -> bool {
        matches!(
            self,
            StepKind::Milestone { .. } | StepKind::Branch { .. } | StepKind::Goto { .. }
        )
    }

    /// Short type tag, as used in serialized definitions
    pub fn tag(&self) -> &'static str {
        match self {
            StepKind::Form => "form",
            StepKind::Approval => "approval",
            StepKind::Task => "task",
            StepKind::FileRequest => "file_request",
            StepKind::ESign => "e_sign",
            StepKind::Decision { .. } => "decision",
            StepKind::Milestone { .. } => "milestone",
            StepKind::Branch { .. } => "branch",
            StepKind::Goto { .. } => "goto",
        }
    }
}

/// One selectable outcome of a decision step
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionOutcome {
    /// Key supplied in the completion's `outcome` field
    pub key: String,
    /// Display label
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub label: String,
    /// Step to continue at; `None` continues with the next step
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<StepId>,
}

impl DecisionOutcome {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: String::new(),
            target: None,
        }
    }

    pub fn to(key: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: String::new(),
            target: Some(StepId::new(target)),
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

/// One parallel path of a branch container
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BranchPath {
    pub name: String,
    pub steps: Vec<Step>,
}

impl BranchPath {
    pub fn new(name: impl Into<String>, steps: Vec<Step>) -> Self {
        Self {
            name: name.into(),
            steps,
        }
    }
}

/// The roles a step is assigned to: one role or a list of roles
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AssigneeRef {
    Role(RoleId),
    Roles(Vec<RoleId>),
}

impl AssigneeRef {
    pub fn roles(&self) -> &[RoleId] {
        match self {
            AssigneeRef::Role(role) => std::slice::from_ref(role),
            AssigneeRef::Roles(roles) => roles,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.roles().is_empty()
    }
}

impl Default for AssigneeRef {
    fn default() -> Self {
        AssigneeRef::Roles(Vec::new())
    }
}

/// When a multi-assignee step counts as completed
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionPolicy {
    /// The first response completes the step
    #[default]
    AnyOne,
    /// Every assignee must respond
    All,
    /// Strictly more than half of the assignees must respond
    Majority,
}

impl CompletionPolicy {
    /// Whether `responded` responses out of `total` assignees satisfy the policy
    pub fn is_satisfied(&self, responded: usize, total: usize) -> bool {
        if total == 0 {
            return responded > 0;
        }
        match self {
            CompletionPolicy::AnyOne => responded >= 1,
            CompletionPolicy::All => responded >= total,
            CompletionPolicy::Majority => responded * 2 > total,
        }
    }
}

// ── Durations ────────────────────────────────────────────────────────

/// Unit of a relative due duration
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Hours,
    Days,
    Weeks,
}

/// A due duration relative to an anchor timestamp
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelativeDuration {
    pub amount: u32,
    pub unit: DurationUnit,
}

impl RelativeDuration {
    /// Longest due duration a definition may declare (about ten years)
    pub const MAX_DAYS: u32 = 3650;

    pub fn hours(amount: u32) -> Self {
        Self {
            amount,
            unit: DurationUnit::Hours,
        }
    }

    pub fn days(amount: u32) -> Self {
        Self {
            amount,
            unit: DurationUnit::Days,
        }
    }

    pub fn weeks(amount: u32) -> Self {
        Self {
            amount,
            unit: DurationUnit::Weeks,
        }
    }

    pub fn to_duration(&self) -> Duration {
        let amount = i64::from(self.amount);
        match self.unit {
            DurationUnit::Hours => Duration::hours(amount),
            DurationUnit::Days => Duration::days(amount),
            DurationUnit::Weeks => Duration::weeks(amount),
        }
    }

    /// Whether the duration is at most [`Self::MAX_DAYS`]
    pub fn is_within_limit(&self) -> bool {
        self.to_duration() <= Duration::days(i64::from(Self::MAX_DAYS))
    }

    /// The instant this duration ends when started at `anchor`, or `None`
    /// when that instant is out of range
    pub fn after(&self, anchor: DateTime<Utc>) -> Option<DateTime<Utc>> {
        anchor.checked_add_signed(self.to_duration())
    }
}

// ── Milestones & Variables ───────────────────────────────────────────

/// A named checkpoint
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub id: MilestoneId,
    pub name: String,
    /// Position among the definition's milestones, ascending along the path
    pub sequence: u32,
}

impl Milestone {
    pub fn new(id: impl Into<String>, name: impl Into<String>, sequence: u32) -> Self {
        Self {
            id: MilestoneId::new(id),
            name: name.into(),
            sequence,
        }
    }
}

/// Type of a flow variable
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableType {
    Text,
    Email,
    User,
    Number,
    Boolean,
    Date,
}

impl VariableType {
    pub fn all() -> Vec<VariableType> {
        vec![
            VariableType::Text,
            VariableType::Email,
            VariableType::User,
            VariableType::Number,
            VariableType::Boolean,
            VariableType::Date,
        ]
    }

    /// Whether values of this type can name an assignee
    pub fn identifies_person(&self) -> bool {
        matches!(self, VariableType::Email | VariableType::User)
    }
}

/// A declared flow variable
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowVariable {
    pub key: String,
    #[serde(rename = "type")]
    pub variable_type: VariableType,
    #[serde(default)]
    pub required: bool,
}

impl FlowVariable {
    pub fn new(key: impl Into<String>, variable_type: VariableType) -> Self {
        Self {
            key: key.into(),
            variable_type,
            required: false,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }
}

// ── Constraints ──────────────────────────────────────────────────────

/// Structural platform limits a definition is validated against
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Constraints {
    pub max_parallel_branches: usize,
    pub max_decision_outcomes: usize,
    pub max_branch_nesting_depth: usize,
    pub milestones_inside_branches_allowed: bool,
    pub branch_must_fit_single_milestone: bool,
    pub goto_targets_main_path_only: bool,
    pub variables_set_only_at_initiation: bool,
    pub allowed_variable_types: Vec<VariableType>,
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            max_parallel_branches: 5,
            max_decision_outcomes: 5,
            max_branch_nesting_depth: 2,
            milestones_inside_branches_allowed: false,
            branch_must_fit_single_milestone: true,
            goto_targets_main_path_only: true,
            variables_set_only_at_initiation: true,
            allowed_variable_types: VariableType::all(),
        }
    }
}

impl Constraints {
    /// Constraints with every structural feature allowed
    pub fn permissive() -> Self {
        Self {
            max_parallel_branches: usize::MAX,
            max_decision_outcomes: usize::MAX,
            max_branch_nesting_depth: usize::MAX,
            milestones_inside_branches_allowed: true,
            branch_must_fit_single_milestone: false,
            goto_targets_main_path_only: false,
            variables_set_only_at_initiation: false,
            allowed_variable_types: VariableType::all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Resolution, Role};

    fn make_simple_definition() -> WorkflowDefinition {
        WorkflowDefinition::new("Vendor Onboarding")
            .with_description("Collect vendor details and approve")
            .with_role(Role::new("ops", "Operations", Resolution::fixed("ops@acme.test")))
            .with_step(Step::form("details", "Vendor details").assigned_to("ops"))
            .with_step(Step::branch(
                "checks",
                "Checks",
                vec![
                    BranchPath::new("legal", vec![Step::task("legal", "Legal").assigned_to("ops")]),
                    BranchPath::new("tax", vec![Step::task("tax", "Tax").assigned_to("ops")]),
                ],
            ))
            .with_step(Step::approval("approve", "Approve").assigned_to("ops"))
    }

    #[test]
    fn test_step_count_includes_branches() {
        let def = make_simple_definition();
        assert_eq!(def.steps.len(), 3);
        assert_eq!(def.step_count(), 5);
    }

    #[test]
    fn test_system_steps() {
        assert!(Step::milestone("m", "kickoff").is_system());
        assert!(Step::goto("g", "details").is_system());
        assert!(Step::branch("b", "B", vec![]).is_system());
        assert!(!Step::form("f", "Form").is_system());
        assert!(!Step::decision("d", "D", vec![]).is_system());
    }

    #[test]
    fn test_assignee_ref_roles() {
        let single = Step::task("t", "T").assigned_to("ops");
        assert_eq!(single.assignees.roles(), &[RoleId::new("ops")]);

        let many = Step::task("t", "T").assigned_to_all(&["a", "b"]);
        assert_eq!(many.assignees.roles().len(), 2);

        assert!(AssigneeRef::default().is_empty());
    }

    #[test]
    fn test_completion_policy() {
        assert!(CompletionPolicy::AnyOne.is_satisfied(1, 3));
        assert!(!CompletionPolicy::All.is_satisfied(2, 3));
        assert!(CompletionPolicy::All.is_satisfied(3, 3));
        assert!(!CompletionPolicy::Majority.is_satisfied(1, 2));
        assert!(CompletionPolicy::Majority.is_satisfied(2, 3));
        assert!(!CompletionPolicy::Majority.is_satisfied(2, 4));
    }

    #[test]
    fn test_relative_duration() {
        let start = Utc::now();
        assert_eq!(RelativeDuration::hours(5).after(start), Some(start + Duration::hours(5)));
        assert_eq!(RelativeDuration::days(2).after(start), Some(start + Duration::days(2)));
        assert_eq!(RelativeDuration::weeks(1).after(start), Some(start + Duration::days(7)));
    }

    #[test]
    fn test_relative_duration_out_of_range() {
        let huge = RelativeDuration::hours(u32::MAX);
        assert!(!huge.is_within_limit());
        assert!(RelativeDuration::weeks(u32::MAX).after(Utc::now()).is_none());
        assert!(RelativeDuration::days(RelativeDuration::MAX_DAYS).is_within_limit());
        assert!(!RelativeDuration::days(RelativeDuration::MAX_DAYS + 1).is_within_limit());
    }

    #[test]
    fn test_definition_json_shape() {
        let json = serde_json::json!({
            "id": "onboarding",
            "name": "Onboarding",
            "steps": [
                { "id": "intro", "name": "Intro", "type": "form", "assignees": "hr" },
                {
                    "id": "route", "name": "Route", "type": "decision",
                    "assignees": ["hr", "it"],
                    "completionPolicy": "all",
                    "outcomes": [{ "key": "fast", "target": "done" }, { "key": "slow" }]
                },
                { "id": "m1", "name": "Halfway", "type": "milestone", "milestoneId": "half" },
                { "id": "done", "name": "Done", "type": "task", "assignees": "hr",
                  "due": { "amount": 2, "unit": "days" } }
            ],
            "milestones": [{ "id": "half", "name": "Halfway", "sequence": 1 }]
        });

        let def: WorkflowDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(def.id, DefinitionId::new("onboarding"));
        assert_eq!(def.version, 1);
        assert_eq!(def.steps[0].assignees, AssigneeRef::Role(RoleId::new("hr")));
        assert_eq!(def.steps[1].completion_policy, CompletionPolicy::All);
        assert!(matches!(
            &def.steps[1].kind,
            StepKind::Decision { outcomes } if outcomes.len() == 2
        ));
        assert!(matches!(&def.steps[2].kind, StepKind::Milestone { .. }));
        assert_eq!(def.steps[3].due, Some(RelativeDuration::days(2)));
        assert_eq!(def.constraints, Constraints::default());
    }

    #[test]
    fn test_lookups() {
        let def = make_simple_definition()
            .with_variable(FlowVariable::new("manager", VariableType::Email))
            .with_milestone(Milestone::new("kickoff", "Kickoff", 1));

        assert!(def.role(&RoleId::new("ops")).is_some());
        assert!(def.role(&RoleId::new("nobody")).is_none());
        assert!(def.variable("manager").is_some());
        assert!(def.milestone(&MilestoneId::new("kickoff")).is_some());
    }

    #[test]
    fn test_definition_id() {
        let id = DefinitionId::generate();
        assert!(!id.0.is_empty());
        assert_eq!(format!("{}", DefinitionId::new("my-template")), "my-template");
    }
}
