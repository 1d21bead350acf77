// Broadcast/direct messaging with priority and expiry

use crate::coordination::SharedDatabase;
use crate::models::{AgentMessage, Channel, MessageType};
use crate::utils::lock_mutex_recover;
use anyhow::Result;
use chrono::{DateTime, Utc};

/// Message bus backed by the shared store.
///
/// Delivery is pull-based: agents poll `receive` (or `pending_count` for a
/// cheap check) rather than holding connections.
pub struct MessageBus {
    db: SharedDatabase,
    default_priority: i32,
}

impl MessageBus {
    pub fn new(db: SharedDatabase, default_priority: i32) -> Self {
        Self {
            db,
            default_priority,
        }
    }

    pub fn default_priority(&self) -> i32 {
        self.default_priority
    }

    /// Post a message to everyone listening on a channel
    pub fn broadcast(
        &self,
        from: &str,
        channel: Channel,
        message_type: MessageType,
        payload: serde_json::Value,
        priority: Option<i32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        self.insert(from, None, channel, message_type, payload, priority, expires_at)
    }

    /// Send a direct message to one agent
    pub fn send(
        &self,
        from: &str,
        to: &str,
        message_type: MessageType,
        payload: serde_json::Value,
        priority: Option<i32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        self.insert(
            from,
            Some(to),
            Channel::Direct,
            message_type,
            payload,
            priority,
            expires_at,
        )
    }

    fn insert(
        &self,
        from: &str,
        to: Option<&str>,
        channel: Channel,
        message_type: MessageType,
        payload: serde_json::Value,
        priority: Option<i32>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<String> {
        let message = AgentMessage {
            id: uuid::Uuid::new_v4().to_string(),
            channel,
            from_agent: from.to_string(),
            to_agent: to.map(|s| s.to_string()),
            message_type,
            payload,
            priority: priority.unwrap_or(self.default_priority),
            created_at: Utc::now(),
            read_at: None,
            expires_at,
        };

        lock_mutex_recover(&self.db).insert_message(&message)?;
        log::debug!(
            "[MessageBus] {} -> {} on {} (priority {})",
            from,
            message.to_agent.as_deref().unwrap_or("*"),
            channel.as_str(),
            message.priority
        );
        Ok(message.id)
    }

    /// Unread, unexpired messages for the agent, priority-weighted FIFO.
    /// With `mark_read` the messages are consumed atomically with the read.
    pub fn receive(
        &self,
        agent_id: &str,
        channel: Option<Channel>,
        mark_read: bool,
    ) -> Result<Vec<AgentMessage>> {
        lock_mutex_recover(&self.db).receive_messages(agent_id, channel, mark_read)
    }

    /// Deliverable message count, without consuming anything
    pub fn pending_count(&self, agent_id: &str) -> Result<i64> {
        lock_mutex_recover(&self.db).pending_message_count(agent_id)
    }

    /// Garbage-collect expired rows
    pub fn cleanup_expired(&self) -> Result<usize> {
        let removed = lock_mutex_recover(&self.db).delete_expired_messages()?;
        if removed > 0 {
            log::debug!("[MessageBus] Collected {} expired messages", removed);
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;
    use std::sync::{Arc, Mutex};

    fn bus() -> MessageBus {
        let db = Database::open_in_memory().unwrap();
        db.init().unwrap();
        MessageBus::new(Arc::new(Mutex::new(db)), 5)
    }

    #[test]
    fn test_broadcast_reaches_other_agents() {
        let bus = bus();

        bus.broadcast(
            "a1",
            Channel::Coordination,
            MessageType::Notification,
            serde_json::json!({"event": "work_completed"}),
            None,
            None,
        )
        .unwrap();

        assert_eq!(bus.pending_count("a2").unwrap(), 1);
        assert_eq!(bus.pending_count("a1").unwrap(), 0);

        let received = bus.receive("a2", None, true).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].priority, 5);
        assert_eq!(received[0].payload["event"], "work_completed");
    }

    #[test]
    fn test_direct_send_targets_one_agent() {
        let bus = bus();

        bus.send(
            "a1",
            "a2",
            MessageType::Request,
            serde_json::json!({"ask": "handoff"}),
            Some(8),
            None,
        )
        .unwrap();

        assert_eq!(bus.pending_count("a2").unwrap(), 1);
        assert_eq!(bus.pending_count("a3").unwrap(), 0);
    }

    #[test]
    fn test_pending_count_does_not_consume() {
        let bus = bus();

        bus.broadcast(
            "a1",
            Channel::Review,
            MessageType::Notification,
            serde_json::json!({}),
            None,
            None,
        )
        .unwrap();

        assert_eq!(bus.pending_count("a2").unwrap(), 1);
        assert_eq!(bus.pending_count("a2").unwrap(), 1);
        bus.receive("a2", None, true).unwrap();
        assert_eq!(bus.pending_count("a2").unwrap(), 0);
    }

    #[test]
    fn test_cleanup_expired() {
        let bus = bus();

        bus.broadcast(
            "a1",
            Channel::Benchmark,
            MessageType::Notification,
            serde_json::json!({}),
            None,
            Some(Utc::now() - chrono::Duration::seconds(1)),
        )
        .unwrap();

        assert_eq!(bus.cleanup_expired().unwrap(), 1);
        assert_eq!(bus.cleanup_expired().unwrap(), 0);
    }
}
