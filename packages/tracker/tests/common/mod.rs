// ABOUTME: Common test utilities for integration tests
// ABOUTME: In-memory storage setup, recording side-effect sinks, actor helpers

use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use worklane_tracker::{
    Actor, AuditEntry, AuditSink, Notification, NotificationSink, SideEffectError, SideEffects,
    SqliteStorage, StorageConfig, TrackerManager, TrackerStorage, UserCreateInput, UserRole,
};

/// Audit sink that records entries for assertions
#[derive(Default)]
pub struct RecordingAuditSink {
    pub entries: Mutex<Vec<AuditEntry>>,
}

#[async_trait]
impl AuditSink for RecordingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), SideEffectError> {
        self.entries.lock().unwrap().push(entry);
        Ok(())
    }
}

/// Notification sink that records notifications for assertions
#[derive(Default)]
pub struct RecordingNotificationSink {
    pub notifications: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSink for RecordingNotificationSink {
    async fn send(&self, notification: Notification) -> Result<(), SideEffectError> {
        self.notifications.lock().unwrap().push(notification);
        Ok(())
    }
}

/// Test context with an isolated in-memory database
pub struct TestContext {
    pub manager: TrackerManager,
    #[allow(dead_code)]
    pub storage: Arc<SqliteStorage>,
    #[allow(dead_code)]
    pub audit: Arc<RecordingAuditSink>,
    #[allow(dead_code)]
    pub notifier: Arc<RecordingNotificationSink>,
}

/// Create a manager backed by a fresh in-memory database
pub async fn setup() -> TestContext {
    let storage = Arc::new(
        SqliteStorage::new(StorageConfig::in_memory())
            .await
            .expect("Failed to create storage"),
    );
    storage.initialize().await.expect("Failed to run migrations");

    let audit = Arc::new(RecordingAuditSink::default());
    let notifier = Arc::new(RecordingNotificationSink::default());
    let effects = SideEffects::new(audit.clone(), notifier.clone());

    let manager = TrackerManager::new(storage.clone() as Arc<dyn TrackerStorage>, effects);

    TestContext {
        manager,
        storage,
        audit,
        notifier,
    }
}

#[allow(dead_code)]
pub async fn member(ctx: &TestContext, name: &str) -> Actor {
    create_actor(ctx, name, UserRole::Member, None).await
}

#[allow(dead_code)]
pub async fn admin(ctx: &TestContext, name: &str) -> Actor {
    create_actor(ctx, name, UserRole::Admin, None).await
}

#[allow(dead_code)]
pub async fn member_in_department(ctx: &TestContext, name: &str, department: &str) -> Actor {
    create_actor(ctx, name, UserRole::Member, Some(department.to_string())).await
}

async fn create_actor(
    ctx: &TestContext,
    name: &str,
    role: UserRole,
    department: Option<String>,
) -> Actor {
    let user = ctx
        .manager
        .create_user(UserCreateInput {
            name: name.to_string(),
            email: format!("{}@example.com", name),
            role: Some(role),
            department,
        })
        .await
        .expect("Failed to create user");
    Actor::from(&user)
}

/// Give spawned side-effect tasks a moment to drain
#[allow(dead_code)]
pub async fn settle_effects() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}
