//! Roles: placeholders bound to real people when a step activates
//!
//! A role never names a person directly. It carries a [`Resolution`]
//! strategy that the engine evaluates against the run's context each
//! time a step owned by the role is entered.

use serde::{Deserialize, Serialize};

/// Identifier of a role, unique within its definition
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleId(pub String);

impl RoleId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }
}

impl std::fmt::Display for RoleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A role declared by a workflow definition
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Role {
    pub role_id: RoleId,
    pub name: String,
    pub resolution: Resolution,
    #[serde(default)]
    pub role_options: RoleOptions,
}

impl Role {
    pub fn new(role_id: impl Into<String>, name: impl Into<String>, resolution: Resolution) -> Self {
        Self {
            role_id: RoleId::new(role_id),
            name: name.into(),
            resolution,
            role_options: RoleOptions::default(),
        }
    }

    pub fn with_default_assignee(mut self, email: impl Into<String>) -> Self {
        self.role_options.default_assignee = Some(email.into());
        self
    }

    pub fn with_escalation_contact(mut self, email: impl Into<String>) -> Self {
        self.role_options.escalation_contact = Some(email.into());
        self
    }
}

/// Per-role options
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoleOptions {
    /// Fallback when a kickoff field or flow variable is absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_assignee: Option<String>,
    /// Who hears about escalations of this role's steps
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation_contact: Option<String>,
}

/// How a role becomes a concrete identity
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Resolution {
    /// Always the configured email
    FixedContact { email: String },
    /// The user who started the run
    WorkspaceInitializer,
    /// The value of a kickoff form field
    KickoffFormField { field: String },
    /// The value of a flow variable
    FlowVariable { key: String },
    /// First matching rule against a source value, else the default
    Rules {
        source: RuleSource,
        rules: Vec<AssignmentRule>,
        default: String,
    },
    /// Rotates over the emails; the cursor is shared by every run of the template
    RoundRobin { emails: Vec<String> },
}

impl Resolution {
    pub fn fixed(email: impl Into<String>) -> Self {
        Resolution::FixedContact {
            email: email.into(),
        }
    }

    pub fn kickoff_field(field: impl Into<String>) -> Self {
        Resolution::KickoffFormField {
            field: field.into(),
        }
    }

    pub fn flow_variable(key: impl Into<String>) -> Self {
        Resolution::FlowVariable { key: key.into() }
    }

    pub fn rules(source: RuleSource, rules: Vec<AssignmentRule>, default: impl Into<String>) -> Self {
        Resolution::Rules {
            source,
            rules,
            default: default.into(),
        }
    }

    pub fn round_robin<S: Into<String>>(emails: impl IntoIterator<Item = S>) -> Self {
        Resolution::RoundRobin {
            emails: emails.into_iter().map(Into::into).collect(),
        }
    }

    /// Flow variable keys this resolution reads
    pub fn variable_refs(&self) -> Vec<&str> {
        match self {
            Resolution::FlowVariable { key } => vec![key.as_str()],
            Resolution::Rules {
                source: RuleSource::FlowVariable { key },
                ..
            } => vec![key.as_str()],
            _ => Vec::new(),
        }
    }
}

/// Where a rules resolution reads its value from
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleSource {
    KickoffField {
        field: String,
    },
    FlowVariable {
        key: String,
    },
    StepOutput {
        #[serde(rename = "stepId")]
        step_id: crate::StepId,
        field: String,
    },
}

/// One `{condition, then}` pair of a rules resolution
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssignmentRule {
    pub condition: RuleCondition,
    pub then: String,
}

impl AssignmentRule {
    pub fn new(condition: RuleCondition, then: impl Into<String>) -> Self {
        Self {
            condition,
            then: then.into(),
        }
    }
}

/// Case-sensitive predicate over a source value
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", content = "value", rename_all = "camelCase")]
pub enum RuleCondition {
    Contains(String),
    Equals(String),
    NotEmpty,
}

impl RuleCondition {
    pub fn contains(value: impl Into<String>) -> Self {
        RuleCondition::Contains(value.into())
    }

    pub fn equals(value: impl Into<String>) -> Self {
        RuleCondition::Equals(value.into())
    }

    pub fn matches(&self, value: &str) -> bool {
        match self {
            RuleCondition::Contains(needle) => value.contains(needle.as_str()),
            RuleCondition::Equals(expected) => value == expected,
            RuleCondition::NotEmpty => !value.is_empty(),
        }
    }
}

/// A concrete person a step is assigned to
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Identity {
    /// A workspace user
    User { id: String, email: String },
    /// An external contact known only by email
    Contact { email: String },
}

impl Identity {
    pub fn user(id: impl Into<String>, email: impl Into<String>) -> Self {
        Identity::User {
            id: id.into(),
            email: email.into(),
        }
    }

    pub fn contact(email: impl Into<String>) -> Self {
        Identity::Contact {
            email: email.into(),
        }
    }

    pub fn email(&self) -> &str {
        match self {
            Identity::User { email, .. } | Identity::Contact { email } => email,
        }
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.email())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_conditions_are_case_sensitive() {
        assert!(RuleCondition::contains("gold").matches("gold tier"));
        assert!(!RuleCondition::contains("Gold").matches("gold tier"));
        assert!(RuleCondition::equals("EU").matches("EU"));
        assert!(!RuleCondition::equals("EU").matches("eu"));
        assert!(RuleCondition::NotEmpty.matches("x"));
        assert!(!RuleCondition::NotEmpty.matches(""));
    }

    #[test]
    fn test_variable_refs() {
        assert_eq!(Resolution::flow_variable("owner").variable_refs(), vec!["owner"]);
        let rules = Resolution::rules(
            RuleSource::FlowVariable {
                key: "tier".into(),
            },
            vec![],
            "ops@acme.test",
        );
        assert_eq!(rules.variable_refs(), vec!["tier"]);
        assert!(Resolution::WorkspaceInitializer.variable_refs().is_empty());
    }

    #[test]
    fn test_identity_email() {
        assert_eq!(Identity::user("u1", "ana@acme.test").email(), "ana@acme.test");
        assert_eq!(Identity::contact("bo@vendor.test").to_string(), "bo@vendor.test");
    }

    #[test]
    fn test_resolution_json_shape() {
        let json = serde_json::json!({
            "roleId": "account_manager",
            "name": "Account manager",
            "resolution": {
                "type": "rules",
                "source": { "kind": "kickoff_field", "field": "tier" },
                "rules": [
                    { "condition": { "op": "contains", "value": "gold" }, "then": "a@acme.test" },
                    { "condition": { "op": "notEmpty" }, "then": "b@acme.test" }
                ],
                "default": "c@acme.test"
            },
            "roleOptions": { "escalationContact": "lead@acme.test" }
        });

        let role: Role = serde_json::from_value(json).unwrap();
        assert_eq!(role.role_id, RoleId::new("account_manager"));
        assert_eq!(
            role.role_options.escalation_contact.as_deref(),
            Some("lead@acme.test")
        );
        match role.resolution {
            Resolution::Rules { rules, default, .. } => {
                assert_eq!(rules.len(), 2);
                assert_eq!(rules[1].condition, RuleCondition::NotEmpty);
                assert_eq!(default, "c@acme.test");
            }
            other => panic!("unexpected resolution: {:?}", other),
        }
    }
}
