// src/hubs.rs
// Real-time Hubs (§4.9): authenticated per-user and per-session broadcast
// groups over WebSocket. One `broadcast::Sender` per group, registered in a
// `DashMap` so any task can fan a message out without holding a connection.

use crate::models::Id;
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;

const GROUP_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HubEvent {
    MessageReceived { session_id: Id, role: &'static str, content: String },
    AssistantTyping { session_id: Id, typing: bool },
    CommandOutput { execution_id: Id, host_id: Id, chunk: String },
    CommandStatus { execution_id: Id, host_id: Id, exit_code: Option<i32>, error: Option<String> },
    Notification { message: String },
}

fn session_group(session_id: Id) -> String {
    format!("session_{session_id}")
}

fn user_group(user_id: Id) -> String {
    format!("user_{user_id}")
}

/// Registry of broadcast groups, shared by ChatHub and CommandHub. Groups are
/// created lazily on first subscribe/publish and never explicitly torn down —
/// an empty `broadcast::Sender` with no subscribers is cheap to keep around
/// and the alternative (refcounting eviction) isn't worth the complexity here.
#[derive(Clone)]
pub struct HubRegistry {
    groups: Arc<DashMap<String, broadcast::Sender<HubEvent>>>,
}

impl HubRegistry {
    pub fn new() -> Self {
        Self { groups: Arc::new(DashMap::new()) }
    }

    fn sender_for(&self, group: &str) -> broadcast::Sender<HubEvent> {
        self.groups
            .entry(group.to_string())
            .or_insert_with(|| broadcast::channel(GROUP_CHANNEL_CAPACITY).0)
            .clone()
    }

    pub fn subscribe(&self, group: &str) -> broadcast::Receiver<HubEvent> {
        self.sender_for(group).subscribe()
    }

    /// No-op (not an error) when nobody is listening on the group.
    pub fn publish(&self, group: &str, event: HubEvent) {
        let _ = self.sender_for(group).send(event);
    }
}

impl Default for HubRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-connection ChatHub session state. One instance lives for the lifetime
/// of a single WebSocket connection.
pub struct ChatHub {
    registry: HubRegistry,
    user_id: Id,
    organization_id: Id,
    joined: Vec<Id>,
}

impl ChatHub {
    pub fn new(registry: HubRegistry, user_id: Id, organization_id: Id) -> Self {
        Self { registry, user_id, organization_id, joined: Vec::new() }
    }

    pub fn user_group_receiver(&self) -> broadcast::Receiver<HubEvent> {
        self.registry.subscribe(&user_group(self.user_id))
    }

    /// Validates the session belongs to the caller's org and user before
    /// subscribing (§4.9); an unauthorized join is a connection-level error,
    /// not a silently-ignored no-op.
    pub fn join_session(&mut self, db: &crate::db::Db, session_id: Id) -> Result<broadcast::Receiver<HubEvent>, crate::error::AppError> {
        let session = db
            .get_session(self.organization_id, session_id)
            .map_err(crate::error::AppError::Internal)?
            .ok_or(crate::error::AppError::NotFound)?;
        if session.user_id != self.user_id {
            return Err(crate::error::AppError::Forbidden);
        }
        let receiver = self.registry.subscribe(&session_group(session_id));
        if !self.joined.contains(&session_id) {
            self.joined.push(session_id);
        }
        Ok(receiver)
    }

    pub fn leave_session(&mut self, session_id: Id) {
        self.joined.retain(|id| *id != session_id);
    }

    pub fn send_message(&self, session_id: Id, content: &str) {
        self.registry.publish(
            &session_group(session_id),
            HubEvent::MessageReceived { session_id, role: "user", content: content.to_string() },
        );
    }

    pub fn assistant_typing(&self, session_id: Id, typing: bool) {
        self.registry.publish(&session_group(session_id), HubEvent::AssistantTyping { session_id, typing });
    }
}

/// Streams `run_command` output and terminal status to the group of the user
/// who issued the command (§4.9) rather than a session group, since a
/// command can be dispatched outside an active chat session.
#[derive(Clone)]
pub struct CommandHub {
    registry: HubRegistry,
}

impl CommandHub {
    pub fn new(registry: HubRegistry) -> Self {
        Self { registry }
    }

    pub fn publish_output(&self, user_id: Id, execution_id: Id, host_id: Id, chunk: String) {
        self.registry.publish(&user_group(user_id), HubEvent::CommandOutput { execution_id, host_id, chunk });
    }

    pub fn publish_status(&self, user_id: Id, execution_id: Id, host_id: Id, exit_code: Option<i32>, error: Option<String>) {
        self.registry.publish(&user_group(user_id), HubEvent::CommandStatus { execution_id, host_id, exit_code, error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publish_without_subscribers_does_not_error() {
        let registry = HubRegistry::new();
        registry.publish("session_nobody", HubEvent::Notification { message: "hi".to_string() });
    }

    #[tokio::test]
    async fn subscriber_receives_published_event() {
        let registry = HubRegistry::new();
        let mut rx = registry.subscribe("session_x");
        registry.publish("session_x", HubEvent::Notification { message: "hello".to_string() });
        let event = rx.recv().await.unwrap();
        match event {
            HubEvent::Notification { message } => assert_eq!(message, "hello"),
            _ => panic!("unexpected event"),
        }
    }

    #[tokio::test]
    async fn join_session_rejects_other_users_session() {
        let db = crate::db::Db::open(":memory:").unwrap();
        db.migrate().unwrap();
        let org = db.create_organization("acme").unwrap();
        let owner = db.create_user(org.id, "owner@acme.test", "Owner", crate::models::OrgRole::Owner, "hash").unwrap();
        let other = db.create_user(org.id, "other@acme.test", "Other", crate::models::OrgRole::Member, "hash").unwrap();
        let session = db.create_session(org.id, owner.id, vec![], false).unwrap();

        let registry = HubRegistry::new();
        let mut hub = ChatHub::new(registry, other.id, org.id);
        assert!(hub.join_session(&db, session.id).is_err());
    }
}
