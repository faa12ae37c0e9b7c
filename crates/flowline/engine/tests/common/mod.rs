#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use flowline_engine::*;
use flowline_types::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Records every notification; can be told to fail or to be slow
#[derive(Debug, Default)]
pub struct RecordingSender {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
    delay: Mutex<Option<Duration>>,
}

impl RecordingSender {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_of(&self, kind: NotificationKind) -> Vec<Notification> {
        self.sent().into_iter().filter(|n| n.kind == kind).collect()
    }

    /// Wait for spawned deliveries to land
    pub async fn wait_for(&self, count: usize) -> Vec<Notification> {
        for _ in 0..200 {
            if self.sent.lock().unwrap().len() >= count {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        self.sent()
    }
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("mail server unavailable".into()));
        }
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

pub struct Harness {
    pub engine: WorkflowEngine,
    pub clock: Arc<ManualClock>,
    pub sender: Arc<RecordingSender>,
}

pub fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
}

pub fn harness() -> Harness {
    harness_with(EngineConfig::default())
}

pub fn harness_with(config: EngineConfig) -> Harness {
    let clock = Arc::new(ManualClock::new(start_time()));
    let sender = RecordingSender::new();
    let engine = WorkflowEngine::in_memory(config)
        .with_clock(clock.clone())
        .with_notifier(sender.clone());
    Harness {
        engine,
        clock,
        sender,
    }
}

impl Harness {
    /// Save and publish, asserting the definition is valid
    pub async fn publish(&self, definition: WorkflowDefinition) -> DefinitionId {
        let id = definition.id.clone();
        let validation = self.engine.save_draft(definition).await.unwrap();
        assert!(validation.valid, "definition invalid: {:?}", validation.errors);
        assert!(self.engine.publish(&id).await.unwrap().valid);
        id
    }

    pub async fn start(&self, id: &DefinitionId) -> Run {
        self.engine.start_run(id, kickoff()).await.unwrap()
    }

    pub async fn complete(&self, run: &Run, step: &str) -> WorkflowResult<Run> {
        self.engine
            .complete_step(&run.run_id, StepCompletion::new(step, serde_json::json!({})))
            .await
    }
}

pub fn initiator() -> Identity {
    Identity::user("u-ana", "ana@acme.test")
}

pub fn kickoff() -> KickoffData {
    KickoffData::new(initiator())
}

pub fn ops() -> Role {
    Role::new("ops", "Operations", Resolution::fixed("ops@acme.test"))
}

pub fn status(run: &Run, step: &str) -> StepStatus {
    run.step(&StepId::new(step)).unwrap().status
}
