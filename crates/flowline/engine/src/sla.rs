//! SLA evaluation for one run
//!
//! Breach and escalation are stamped at most once per step execution and
//! never cleared. Reminders are counted and rate-limited. Reminder and
//! escalation notifications are queued in the run's outbox; delivery is
//! the sweep's business.

use crate::config::SlaConfig;
use crate::plan::StepPlan;
use chrono::{DateTime, Utc};
use flowline_types::*;

/// What one evaluation changed
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SlaReport {
    pub breaches: Vec<StepId>,
    pub reminders: Vec<StepId>,
    pub escalations: Vec<StepId>,
}

impl SlaReport {
    pub fn is_empty(&self) -> bool {
        self.breaches.is_empty() && self.reminders.is_empty() && self.escalations.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct SlaMonitor {
    config: SlaConfig,
}

impl SlaMonitor {
    pub fn new(config: SlaConfig) -> Self {
        Self { config }
    }

    /// Stamp breaches, reminders and escalations due at `now`.
    ///
    /// Only runs in progress are evaluated; system steps and steps without
    /// a due date are ignored.
    pub fn evaluate(
        &self,
        run: &mut Run,
        definition: &WorkflowDefinition,
        plan: &StepPlan,
        now: DateTime<Utc>,
    ) -> SlaReport {
        let mut report = SlaReport::default();
        if run.status != RunStatus::InProgress || run.steps.len() != plan.len() {
            return report;
        }

        let mut queued = Vec::new();
        for (idx, exec) in run.steps.iter_mut().enumerate() {
            let step = &plan.node(idx).step;
            if step.is_system() || exec.status != StepStatus::InProgress {
                continue;
            }
            let Some(due) = exec.due_at else {
                continue;
            };

            if now >= due && exec.sla_breached_at.is_none() {
                exec.sla_breached_at = Some(now);
                report.breaches.push(step.id.clone());
            }

            if self.reminder_due(exec, due, now) {
                exec.reminder_count += 1;
                exec.last_reminder_at = Some(now);
                for assignment in exec.outstanding() {
                    queued.push(Notification::new(
                        run.run_id.clone(),
                        step.id.clone(),
                        assignment.identity.email(),
                        NotificationKind::Reminder,
                    ));
                }
                report.reminders.push(step.id.clone());
            }

            let escalate_at = due.checked_add_signed(self.config.escalate_after());
            if escalate_at.is_some_and(|at| now >= at) && exec.escalated_at.is_none() {
                exec.escalated_at = Some(now);
                queued.push(Notification::new(
                    run.run_id.clone(),
                    step.id.clone(),
                    escalation_recipient(step, definition, &run.initiator),
                    NotificationKind::Escalation,
                ));
                report.escalations.push(step.id.clone());
            }
        }

        for step_id in &report.breaches {
            run.record(now, "sla_breached", format!("Step {} is overdue", step_id));
        }
        for step_id in &report.escalations {
            run.record(now, "step_escalated", format!("Step {} escalated", step_id));
        }
        run.outbox
            .extend(queued.into_iter().map(|n| PendingNotification::new(n, now)));

        if !report.is_empty() {
            tracing::debug!(
                run_id = %run.run_id,
                breaches = report.breaches.len(),
                reminders = report.reminders.len(),
                escalations = report.escalations.len(),
                "SLA events"
            );
        }
        report
    }

    fn reminder_due(&self, exec: &StepExecution, due: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        if exec.reminder_count >= self.config.max_reminders {
            return false;
        }
        // A lead reaching past the earliest instant means reminders already started
        let starts = due.checked_sub_signed(self.config.reminder_lead());
        if starts.is_some_and(|start| now < start) {
            return false;
        }
        if let Some(last) = exec.last_reminder_at {
            if now - last < self.config.reminder_interval() {
                return false;
            }
        }
        exec.outstanding().next().is_some()
    }
}

/// `escalateTo`, else the first assignee role's escalation contact, else
/// the initiator
fn escalation_recipient(step: &Step, definition: &WorkflowDefinition, initiator: &Identity) -> String {
    if let Some(email) = &step.escalate_to {
        return email.clone();
    }
    step.assignees
        .roles()
        .first()
        .and_then(|role| definition.role(role))
        .and_then(|role| role.role_options.escalation_contact.clone())
        .unwrap_or_else(|| initiator.email().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn setup(step: Step) -> (Run, WorkflowDefinition, StepPlan, DateTime<Utc>) {
        let def = WorkflowDefinition::new("Sla")
            .with_role(
                Role::new("ops", "Ops", Resolution::fixed("ops@acme.test"))
                    .with_escalation_contact("lead@acme.test"),
            )
            .with_step(step);
        let plan = StepPlan::build(&def);
        let start = Utc::now();
        let mut run = Run::new(
            def.id.clone(),
            1,
            Identity::contact("ana@acme.test"),
            plan.step_ids(),
            start,
        );
        let exec = &mut run.steps[0];
        exec.activate(start);
        exec.due_at = Some(start + Duration::days(2));
        exec.assigned_to.push(Assignment::new(
            RoleId::new("ops"),
            Identity::contact("ops@acme.test"),
            start,
        ));
        (run, def, plan, start)
    }

    fn task() -> Step {
        Step::task("a", "A").assigned_to("ops")
    }

    #[test]
    fn test_breach_is_stamped_once() {
        let monitor = SlaMonitor::new(SlaConfig::default());
        let (mut run, def, plan, start) = setup(task());

        let day3 = start + Duration::days(3);
        let report = monitor.evaluate(&mut run, &def, &plan, day3);
        assert_eq!(report.breaches, vec![StepId::new("a")]);
        assert_eq!(run.steps[0].sla_breached_at, Some(day3));

        let report = monitor.evaluate(&mut run, &def, &plan, start + Duration::days(4));
        assert!(report.breaches.is_empty());
        assert_eq!(run.steps[0].sla_breached_at, Some(day3));
    }

    #[test]
    fn test_huge_offsets_never_overflow() {
        let config = SlaConfig {
            reminder_lead_secs: u64::MAX,
            escalate_after_secs: u64::MAX,
            ..SlaConfig::default()
        };
        let monitor = SlaMonitor::new(config);
        let (mut run, def, plan, start) = setup(task());

        let report = monitor.evaluate(&mut run, &def, &plan, start + Duration::days(3));
        assert_eq!(report.breaches, vec![StepId::new("a")]);
        assert_eq!(report.reminders, vec![StepId::new("a")]);
        assert!(report.escalations.is_empty());
        assert!(run.steps[0].escalated_at.is_none());
    }

    #[test]
    fn test_reminders_are_rate_limited_and_capped() {
        let config = SlaConfig {
            max_reminders: 2,
            escalate_after_secs: 30 * 86_400,
            ..SlaConfig::default()
        };
        let monitor = SlaMonitor::new(config);
        let (mut run, def, plan, start) = setup(task());

        assert!(monitor
            .evaluate(&mut run, &def, &plan, start + Duration::hours(12))
            .reminders
            .is_empty());

        let first = start + Duration::hours(25);
        assert_eq!(monitor.evaluate(&mut run, &def, &plan, first).reminders.len(), 1);
        assert!(monitor
            .evaluate(&mut run, &def, &plan, first + Duration::hours(1))
            .reminders
            .is_empty());
        assert_eq!(
            monitor
                .evaluate(&mut run, &def, &plan, first + Duration::days(1))
                .reminders
                .len(),
            1
        );
        assert!(monitor
            .evaluate(&mut run, &def, &plan, first + Duration::days(5))
            .reminders
            .is_empty());

        assert_eq!(run.steps[0].reminder_count, 2);
        let reminders = run
            .outbox
            .iter()
            .filter(|p| p.notification.kind == NotificationKind::Reminder)
            .count();
        assert_eq!(reminders, 2);
    }

    #[test]
    fn test_no_reminder_without_outstanding_assignees() {
        let monitor = SlaMonitor::new(SlaConfig::default());
        let (mut run, def, plan, start) = setup(task());
        run.steps[0].assigned_to[0].responded_at = Some(start);
        let report = monitor.evaluate(&mut run, &def, &plan, start + Duration::days(2));
        assert!(report.reminders.is_empty());
        assert_eq!(report.breaches.len(), 1);
    }

    #[test]
    fn test_escalation_recipients() {
        let monitor = SlaMonitor::new(SlaConfig::default());
        let late = |start: DateTime<Utc>| start + Duration::days(4);

        let (mut run, def, plan, start) = setup(task());
        let report = monitor.evaluate(&mut run, &def, &plan, late(start));
        assert_eq!(report.escalations.len(), 1);
        let escalation = run
            .outbox
            .iter()
            .find(|p| p.notification.kind == NotificationKind::Escalation)
            .unwrap();
        assert_eq!(escalation.notification.recipient, "lead@acme.test");

        let (mut run, def, plan, start) = setup(task().escalate_to("boss@acme.test"));
        monitor.evaluate(&mut run, &def, &plan, late(start));
        assert!(run
            .outbox
            .iter()
            .any(|p| p.notification.recipient == "boss@acme.test"));

        let mut def_without_contact = def.clone();
        def_without_contact.roles[0].role_options.escalation_contact = None;
        let (mut run, _, plan, start) = setup(task());
        monitor.evaluate(&mut run, &def_without_contact, &plan, late(start));
        assert!(run
            .outbox
            .iter()
            .any(|p| p.notification.recipient == "ana@acme.test"));

        let again = monitor.evaluate(&mut run, &def_without_contact, &plan, late(start) + Duration::days(1));
        assert!(again.escalations.is_empty());
    }

    #[test]
    fn test_paused_runs_are_ignored() {
        let monitor = SlaMonitor::new(SlaConfig::default());
        let (mut run, def, plan, start) = setup(task());
        run.pause(start, "holiday");
        let report = monitor.evaluate(&mut run, &def, &plan, start + Duration::days(5));
        assert!(report.is_empty());
        assert!(run.steps[0].sla_breached_at.is_none());
    }
}
