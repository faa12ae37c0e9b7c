//! Flowline workflow engine
//!
//! The engine validates workflow templates, runs them, resolves role
//! placeholders to people and watches step due dates.
//!
//! # Key Principle
//!
//! **The engine tracks work, it never does the work.**
//!
//! It activates steps, binds owners, and waits for completion events.
//! People (or external systems acting for them) do the actual work.
//!
//! # Architecture
//!
//! The [`WorkflowEngine`] composes specialized components:
//!
//! - [`validate_definition`] - Structural checks against platform constraints
//! - [`StepPlan`] - A definition flattened into paths and positions
//! - [`StateMachine`] - Step activation, branching, decisions and gotos
//! - [`AssigneeResolver`] - Turns roles into identities
//! - [`SlaMonitor`] - Breaches, reminders and escalations
//! - [`SlaScheduler`] - Runs the SLA sweep on an interval
//!
//! Persistence, time and notification delivery sit behind the
//! [`WorkflowStore`], [`Clock`] and [`NotificationSender`] traits.
//!
//! # Example
//!
//! ```rust
//! use flowline_engine::{EngineConfig, WorkflowEngine};
//! use flowline_types::*;
//!
//! # tokio_test::block_on(async {
//! let engine = WorkflowEngine::in_memory(EngineConfig::default());
//!
//! let def = WorkflowDefinition::new("Document Review")
//!     .with_id("review")
//!     .with_role(Role::new("editor", "Editor", Resolution::fixed("ed@acme.test")))
//!     .with_step(Step::task("review", "Review").assigned_to("editor"));
//!
//! engine.save_draft(def).await.unwrap();
//! assert!(engine.publish(&DefinitionId::new("review")).await.unwrap().valid);
//!
//! let run = engine
//!     .start_run(
//!         &DefinitionId::new("review"),
//!         KickoffData::new(Identity::contact("ana@acme.test")),
//!     )
//!     .await
//!     .unwrap();
//! assert!(run.is_active());
//! # });
//! ```

#![deny(unsafe_code)]

pub mod clock;
pub mod config;
pub mod engine;
pub mod locks;
pub mod memory;
pub mod notify;
pub mod plan;
pub mod resolver;
pub mod scheduler;
pub mod sla;
pub mod state_machine;
pub mod store;
pub mod validator;

// Re-export main types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, SlaConfig};
pub use engine::{SweepReport, WorkflowEngine};
pub use memory::InMemoryWorkflowStore;
pub use notify::{LogNotificationSender, NotificationSender, NotifyError};
pub use plan::StepPlan;
pub use resolver::AssigneeResolver;
pub use scheduler::SlaScheduler;
pub use sla::{SlaMonitor, SlaReport};
pub use state_machine::{StateMachine, Transition};
pub use store::{
    DefinitionRecord, DefinitionStatus, DefinitionStore, RotationStore, RunFilter, RunStore,
    WorkflowStore,
};
pub use validator::validate_definition;
