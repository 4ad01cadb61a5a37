// ABOUTME: Fire-and-forget side effects for state transitions
// ABOUTME: Audit and notification sinks; failures are logged, never surfaced

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Side-effect delivery errors
#[derive(Error, Debug)]
pub enum SideEffectError {
    #[error("Sink failure: {0}")]
    Sink(String),
}

/// One audit record describing a state transition
#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: String,
    pub actor: String,
    pub action: String,
    pub resource: String,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        detail: Option<String>,
    ) -> Self {
        AuditEntry {
            id: Uuid::new_v4().to_string(),
            actor: actor.into(),
            action: action.into(),
            resource: resource.into(),
            detail,
            recorded_at: Utc::now(),
        }
    }
}

/// Notification severity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// A notification fan-out request
#[derive(Debug, Clone)]
pub struct Notification {
    pub recipients: Vec<String>,
    pub title: String,
    pub body: String,
    pub severity: Severity,
}

/// Collaborator interface for durable audit logging
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: AuditEntry) -> Result<(), SideEffectError>;
}

/// Collaborator interface for notification delivery
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn send(&self, notification: Notification) -> Result<(), SideEffectError>;
}

/// Audit sink that writes structured log events
pub struct TracingAuditSink;

#[async_trait]
impl AuditSink for TracingAuditSink {
    async fn record(&self, entry: AuditEntry) -> Result<(), SideEffectError> {
        info!(
            target: "worklane::audit",
            actor = %entry.actor,
            action = %entry.action,
            resource = %entry.resource,
            detail = entry.detail.as_deref().unwrap_or(""),
            "audit"
        );
        Ok(())
    }
}

/// Notification sink that writes structured log events
pub struct TracingNotificationSink;

#[async_trait]
impl NotificationSink for TracingNotificationSink {
    async fn send(&self, notification: Notification) -> Result<(), SideEffectError> {
        info!(
            target: "worklane::notify",
            recipients = notification.recipients.len(),
            title = %notification.title,
            "notification"
        );
        Ok(())
    }
}

/// Dispatches side effects without awaiting them.
///
/// Delivery happens on a spawned task; a failed sink is logged and
/// swallowed so it can never roll back the state transition that
/// triggered it.
#[derive(Clone)]
pub struct SideEffects {
    audit: Arc<dyn AuditSink>,
    notifier: Arc<dyn NotificationSink>,
}

impl SideEffects {
    pub fn new(audit: Arc<dyn AuditSink>, notifier: Arc<dyn NotificationSink>) -> Self {
        SideEffects { audit, notifier }
    }

    /// Sinks that only write log events; the default wiring.
    pub fn logging() -> Self {
        SideEffects {
            audit: Arc::new(TracingAuditSink),
            notifier: Arc::new(TracingNotificationSink),
        }
    }

    /// Record an audit entry, fire-and-forget.
    pub fn audit(
        &self,
        actor: impl Into<String>,
        action: impl Into<String>,
        resource: impl Into<String>,
        detail: Option<String>,
    ) {
        let entry = AuditEntry::new(actor, action, resource, detail);
        let sink = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.record(entry).await {
                warn!("Audit record dropped: {}", e);
            }
        });
    }

    /// Send a notification, fire-and-forget.
    pub fn notify(
        &self,
        recipients: Vec<String>,
        title: impl Into<String>,
        body: impl Into<String>,
        severity: Severity,
    ) {
        if recipients.is_empty() {
            return;
        }
        let notification = Notification {
            recipients,
            title: title.into(),
            body: body.into(),
            severity,
        };
        let sink = self.notifier.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.send(notification).await {
                warn!("Notification dropped: {}", e);
            }
        });
    }
}
