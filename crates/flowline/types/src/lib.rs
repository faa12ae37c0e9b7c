//! Flowline domain types
//!
//! A workflow in Flowline is a **template**: an ordered main path of
//! human and system steps, optionally forking into parallel branches,
//! with named milestones and role placeholders that are bound to real
//! people only when a step activates.
//!
//! # Key Concepts
//!
//! - **WorkflowDefinition**: the immutable blueprint. Steps, milestones,
//!   roles, flow variables and the platform constraints it was authored
//!   against.
//! - **Role / Resolution**: a placeholder and the strategy that turns it
//!   into a concrete [`Identity`] (fixed contact, initiator, kickoff field,
//!   flow variable, rules, round-robin).
//! - **Run**: one execution of a definition, holding one
//!   [`StepExecution`] per step plus the cursors of every open path.
//! - **ValidationResult**: structural issues found in a definition,
//!   each tagged with a path, a rule and a severity.
//!
//! All types here are plain data: no I/O, no clocks, no locks.

#![deny(unsafe_code)]

mod definition;
mod errors;
mod notification;
mod role;
mod run;
mod validation;

pub use definition::*;
pub use errors::*;
pub use notification::*;
pub use role::*;
pub use run::*;
pub use validation::*;
