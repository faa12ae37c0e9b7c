//! Validation results for workflow definitions

use serde::{Deserialize, Serialize};

/// Whether an issue blocks publishing
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

/// Structural rules a definition is checked against
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ValidationRule {
    EmptyDefinition,
    DuplicateStepId,
    DuplicateRoleId,
    DuplicateVariableKey,
    MissingAssignee,
    UnknownRole,
    UnknownVariable,
    VariableTypeNotAllowed,
    VariableSetAfterKickoff,
    AssigneeVariableType,
    EmptyRoundRobin,
    EmptyRuleDefault,
    DecisionOutcomeCount,
    DecisionTooFewOutcomes,
    DuplicateOutcome,
    DecisionTarget,
    BranchCount,
    EmptyBranch,
    BranchNestingDepth,
    MilestoneInBranch,
    BranchSpansMilestones,
    UnknownMilestone,
    MilestoneOrder,
    UnusedMilestone,
    GotoTarget,
    GotoMainPathOnly,
    SingleAssigneePolicy,
    DueDuration,
}

impl ValidationRule {
    /// Rule identifier as reported in issues
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationRule::EmptyDefinition => "empty-definition",
            ValidationRule::DuplicateStepId => "duplicate-step-id",
            ValidationRule::DuplicateRoleId => "duplicate-role-id",
            ValidationRule::DuplicateVariableKey => "duplicate-variable-key",
            ValidationRule::MissingAssignee => "missing-assignee",
            ValidationRule::UnknownRole => "unknown-role",
            ValidationRule::UnknownVariable => "unknown-variable",
            ValidationRule::VariableTypeNotAllowed => "variable-type-not-allowed",
            ValidationRule::VariableSetAfterKickoff => "variable-set-after-kickoff",
            ValidationRule::AssigneeVariableType => "assignee-variable-type",
            ValidationRule::EmptyRoundRobin => "empty-round-robin",
            ValidationRule::EmptyRuleDefault => "empty-rule-default",
            ValidationRule::DecisionOutcomeCount => "decision-outcome-count",
            ValidationRule::DecisionTooFewOutcomes => "decision-too-few-outcomes",
            ValidationRule::DuplicateOutcome => "duplicate-outcome",
            ValidationRule::DecisionTarget => "decision-target",
            ValidationRule::BranchCount => "branch-count",
            ValidationRule::EmptyBranch => "empty-branch",
            ValidationRule::BranchNestingDepth => "branch-nesting-depth",
            ValidationRule::MilestoneInBranch => "milestone-in-branch",
            ValidationRule::BranchSpansMilestones => "branch-spans-milestones",
            ValidationRule::UnknownMilestone => "unknown-milestone",
            ValidationRule::MilestoneOrder => "milestone-order",
            ValidationRule::UnusedMilestone => "unused-milestone",
            ValidationRule::GotoTarget => "goto-target",
            ValidationRule::GotoMainPathOnly => "goto-main-path-only",
            ValidationRule::SingleAssigneePolicy => "single-assignee-policy",
            ValidationRule::DueDuration => "due-duration",
        }
    }

    /// Severity this rule reports with
    pub fn severity(&self) -> Severity {
        match self {
            ValidationRule::AssigneeVariableType
            | ValidationRule::MilestoneOrder
            | ValidationRule::UnusedMilestone
            | ValidationRule::SingleAssigneePolicy => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

impl std::fmt::Display for ValidationRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One problem found in a definition
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    /// Structural path, e.g. `steps[3].assignees`
    pub path: String,
    pub rule: ValidationRule,
    pub message: String,
    pub severity: Severity,
}

impl ValidationIssue {
    pub fn new(path: impl Into<String>, rule: ValidationRule, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            rule,
            message: message.into(),
            severity: rule.severity(),
        }
    }
}

/// Outcome of validating a definition
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationResult {
    /// Split issues by severity; valid when there are no errors
    pub fn from_issues(issues: impl IntoIterator<Item = ValidationIssue>) -> Self {
        let (errors, warnings): (Vec<_>, Vec<_>) = issues
            .into_iter()
            .partition(|issue| issue.severity == Severity::Error);
        Self {
            valid: errors.is_empty(),
            errors,
            warnings,
        }
    }

    /// Whether any error or warning was reported under `rule`
    pub fn has_rule(&self, rule: ValidationRule) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|issue| issue.rule == rule)
    }

    pub fn issues(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.errors.iter().chain(self.warnings.iter())
    }
}
