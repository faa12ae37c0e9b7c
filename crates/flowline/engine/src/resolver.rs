//! Assignee resolution: roles to concrete identities
//!
//! Resolution happens every time a step activates, against the run's
//! context at that moment. Only round-robin touches storage: its cursor is
//! shared by every run of the definition and advanced atomically by the
//! [`RotationStore`].

use crate::store::RotationStore;
use flowline_types::*;
use serde_json::Value;
use std::sync::Arc;

/// Turns roles into identities
#[derive(Clone)]
pub struct AssigneeResolver {
    rotations: Arc<dyn RotationStore>,
}

impl std::fmt::Debug for AssigneeResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssigneeResolver").finish_non_exhaustive()
    }
}

impl AssigneeResolver {
    pub fn new(rotations: Arc<dyn RotationStore>) -> Self {
        Self { rotations }
    }

    /// Resolve a role to exactly one identity.
    ///
    /// Fails with [`WorkflowError::UnresolvableAssignee`] when the context
    /// does not name anyone, or with a storage error when the rotation
    /// cursor cannot be advanced.
    pub async fn resolve(&self, role: &Role, ctx: &RunContext) -> WorkflowResult<Identity> {
        let email = match &role.resolution {
            Resolution::FixedContact { email } => email.clone(),
            Resolution::WorkspaceInitializer => return Ok(ctx.initiator.clone()),
            Resolution::KickoffFormField { field } => lookup(role, ctx.kickoff.get(field))
                .ok_or_else(|| {
                    ResolutionError::new(
                        role.role_id.clone(),
                        format!("kickoff field '{}' is empty and no default assignee is set", field),
                    )
                })?,
            Resolution::FlowVariable { key } => lookup(role, ctx.variables.get(key))
                .ok_or_else(|| {
                    ResolutionError::new(
                        role.role_id.clone(),
                        format!("flow variable '{}' is unbound and no default assignee is set", key),
                    )
                })?,
            Resolution::Rules {
                source,
                rules,
                default,
            } => {
                let value = source_value(source, ctx);
                rules
                    .iter()
                    .find(|rule| rule.condition.matches(&value))
                    .map(|rule| rule.then.clone())
                    .unwrap_or_else(|| default.clone())
            }
            Resolution::RoundRobin { emails } => {
                if emails.is_empty() {
                    return Err(ResolutionError::new(
                        role.role_id.clone(),
                        "round-robin list is empty",
                    )
                    .into());
                }
                let turn = self
                    .rotations
                    .advance_rotation(&ctx.definition_id, &role.role_id)
                    .await?;
                let slot = (turn % emails.len() as u64) as usize;
                emails[slot].clone()
            }
        };

        to_identity(role, email, ctx)
    }
}

/// Render a context value as text; `None` for absent values
pub fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

/// Field value, else the role's default assignee
fn lookup(role: &Role, value: Option<&Value>) -> Option<String> {
    value
        .and_then(render_value)
        .filter(|s| !s.trim().is_empty())
        .or_else(|| role.role_options.default_assignee.clone())
}

fn source_value(source: &RuleSource, ctx: &RunContext) -> String {
    let value = match source {
        RuleSource::KickoffField { field } => ctx.kickoff.get(field),
        RuleSource::FlowVariable { key } => ctx.variables.get(key),
        RuleSource::StepOutput { step_id, field } => {
            ctx.step_outputs.get(step_id).and_then(|out| out.get(field))
        }
    };
    value.and_then(render_value).unwrap_or_default()
}

fn to_identity(role: &Role, email: String, ctx: &RunContext) -> WorkflowResult<Identity> {
    let email = email.trim();
    if email.is_empty() || !email.contains('@') {
        return Err(ResolutionError::new(
            role.role_id.clone(),
            format!("'{}' is not an email address", email),
        )
        .into());
    }
    if ctx.initiator.email() == email {
        return Ok(ctx.initiator.clone());
    }
    Ok(Identity::contact(email))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryWorkflowStore;
    use serde_json::json;

    fn resolver() -> AssigneeResolver {
        AssigneeResolver::new(Arc::new(InMemoryWorkflowStore::new()))
    }

    fn ctx() -> RunContext {
        RunContext::new(
            DefinitionId::new("onboarding"),
            Identity::user("u1", "ana@acme.test"),
        )
    }

    fn tier_rules() -> Role {
        Role::new(
            "account_manager",
            "Account manager",
            Resolution::rules(
                RuleSource::KickoffField { field: "tier".into() },
                vec![
                    AssignmentRule::new(RuleCondition::contains("gold"), "a@acme.test"),
                    AssignmentRule::new(RuleCondition::contains("silver"), "b@acme.test"),
                ],
                "c@acme.test",
            ),
        )
    }

    #[tokio::test]
    async fn test_fixed_and_initiator() {
        let r = resolver();
        let fixed = Role::new("legal", "Legal", Resolution::fixed("legal@acme.test"));
        assert_eq!(
            r.resolve(&fixed, &ctx()).await.unwrap(),
            Identity::contact("legal@acme.test")
        );

        let init = Role::new("me", "Me", Resolution::WorkspaceInitializer);
        assert_eq!(
            r.resolve(&init, &ctx()).await.unwrap(),
            Identity::user("u1", "ana@acme.test")
        );
    }

    #[tokio::test]
    async fn test_kickoff_field_with_default() {
        let r = resolver();
        let role = Role::new("mgr", "Manager", Resolution::kickoff_field("manager_email"));

        let with_value = ctx().with_kickoff("manager_email", json!("bo@acme.test"));
        assert_eq!(
            r.resolve(&role, &with_value).await.unwrap().email(),
            "bo@acme.test"
        );

        let err = r.resolve(&role, &ctx()).await.unwrap_err();
        assert_eq!(err.code(), "UNRESOLVABLE_ASSIGNEE");

        let empty = ctx().with_kickoff("manager_email", json!(""));
        let role = role.with_default_assignee("fallback@acme.test");
        assert_eq!(
            r.resolve(&role, &empty).await.unwrap().email(),
            "fallback@acme.test"
        );
    }

    #[tokio::test]
    async fn test_flow_variable_ignores_structured_values() {
        let r = resolver();
        let role = Role::new("owner", "Owner", Resolution::flow_variable("owner"));
        let structured = ctx().with_variable("owner", json!({ "email": "x@acme.test" }));
        assert!(r.resolve(&role, &structured).await.is_err());

        let bound = ctx().with_variable("owner", json!("x@acme.test"));
        assert_eq!(r.resolve(&role, &bound).await.unwrap().email(), "x@acme.test");
    }

    #[tokio::test]
    async fn test_rules_first_match_wins() {
        let r = resolver();
        let role = tier_rules();

        let gold = ctx().with_kickoff("tier", json!("gold tier"));
        assert_eq!(r.resolve(&role, &gold).await.unwrap().email(), "a@acme.test");

        let both = ctx().with_kickoff("tier", json!("silver and gold"));
        assert_eq!(r.resolve(&role, &both).await.unwrap().email(), "a@acme.test");

        let bronze = ctx().with_kickoff("tier", json!("bronze"));
        assert_eq!(r.resolve(&role, &bronze).await.unwrap().email(), "c@acme.test");

        assert_eq!(r.resolve(&role, &ctx()).await.unwrap().email(), "c@acme.test");
    }

    #[tokio::test]
    async fn test_rules_on_step_output_and_numbers() {
        let r = resolver();
        let role = Role::new(
            "approver",
            "Approver",
            Resolution::rules(
                RuleSource::StepOutput {
                    step_id: StepId::new("quote"),
                    field: "amount".into(),
                },
                vec![AssignmentRule::new(RuleCondition::equals("5000"), "cfo@acme.test")],
                "lead@acme.test",
            ),
        );
        let ctx = ctx().with_step_output("quote", json!({ "amount": 5000 }));
        assert_eq!(r.resolve(&role, &ctx).await.unwrap().email(), "cfo@acme.test");
    }

    #[tokio::test]
    async fn test_round_robin_sequence() {
        let r = resolver();
        let role = Role::new(
            "reviewer",
            "Reviewer",
            Resolution::round_robin(["x@acme.test", "y@acme.test", "z@acme.test"]),
        );

        let mut picked = Vec::new();
        for _ in 0..5 {
            picked.push(r.resolve(&role, &ctx()).await.unwrap().email().to_string());
        }
        assert_eq!(
            picked,
            vec!["x@acme.test", "y@acme.test", "z@acme.test", "x@acme.test", "y@acme.test"]
        );
    }

    #[tokio::test]
    async fn test_non_email_value_is_unresolvable() {
        let r = resolver();
        let role = Role::new("mgr", "Manager", Resolution::kickoff_field("manager"));
        let ctx = ctx().with_kickoff("manager", json!("Bo Smith"));
        let err = r.resolve(&role, &ctx).await.unwrap_err();
        assert!(matches!(err, WorkflowError::UnresolvableAssignee { .. }));
    }

    #[test]
    fn test_render_value() {
        assert_eq!(render_value(&json!("a")), Some("a".into()));
        assert_eq!(render_value(&json!(3.5)), Some("3.5".into()));
        assert_eq!(render_value(&json!(true)), Some("true".into()));
        assert_eq!(render_value(&json!(null)), None);
        assert_eq!(render_value(&json!([1])), None);
    }
}
