//! Engine configuration

use serde::{Deserialize, Serialize};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// SLA sweep configuration
    #[serde(default)]
    pub sla: SlaConfig,

    /// Automatic (system) steps one event may process before it is rejected
    #[serde(default = "default_max_automatic_steps")]
    pub max_automatic_steps: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sla: SlaConfig::default(),
            max_automatic_steps: default_max_automatic_steps(),
        }
    }
}

/// SLA sweep configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlaConfig {
    /// Seconds between sweeps
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,

    /// Seconds before the due date when reminders start
    #[serde(default = "default_one_day")]
    pub reminder_lead_secs: u64,

    /// Minimum seconds between two reminders for one step
    #[serde(default = "default_one_day")]
    pub reminder_interval_secs: u64,

    /// Reminders per step execution
    #[serde(default = "default_max_reminders")]
    pub max_reminders: u32,

    /// Seconds past the due date when a step escalates
    #[serde(default = "default_one_day")]
    pub escalate_after_secs: u64,

    /// Seconds one delivery attempt may take
    #[serde(default = "default_delivery_timeout")]
    pub delivery_timeout_secs: u64,

    /// Failed deliveries before a notification is dropped
    #[serde(default = "default_max_delivery_attempts")]
    pub max_delivery_attempts: u32,
}

impl Default for SlaConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval(),
            reminder_lead_secs: default_one_day(),
            reminder_interval_secs: default_one_day(),
            max_reminders: default_max_reminders(),
            escalate_after_secs: default_one_day(),
            delivery_timeout_secs: default_delivery_timeout(),
            max_delivery_attempts: default_max_delivery_attempts(),
        }
    }
}

impl SlaConfig {
    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs.max(1))
    }

    pub fn reminder_lead(&self) -> chrono::Duration {
        seconds(self.reminder_lead_secs)
    }

    /// Gap between reminders, never shorter than the sweep interval
    pub fn reminder_interval(&self) -> chrono::Duration {
        seconds(self.reminder_interval_secs.max(self.sweep_interval_secs))
    }

    pub fn escalate_after(&self) -> chrono::Duration {
        seconds(self.escalate_after_secs)
    }

    pub fn delivery_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.delivery_timeout_secs)
    }
}

/// Saturates at [`chrono::Duration::MAX`]
fn seconds(secs: u64) -> chrono::Duration {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .unwrap_or(chrono::Duration::MAX)
}

fn default_max_automatic_steps() -> usize {
    1000
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_one_day() -> u64 {
    86_400
}

fn default_max_reminders() -> u32 {
    3
}

fn default_delivery_timeout() -> u64 {
    10
}

fn default_max_delivery_attempts() -> u32 {
    5
}
