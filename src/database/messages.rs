// Agent message table operations

use crate::models::{AgentMessage, Channel, MessageType};
use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Row};

impl super::Database {
    /// Insert a message row
    pub fn insert_message(&self, message: &AgentMessage) -> Result<()> {
        self.get_connection().execute(
            "INSERT INTO agent_messages (
                id, channel, from_agent, to_agent, message_type,
                payload, priority, created_at, read_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                message.id,
                message.channel.as_str(),
                message.from_agent,
                message.to_agent,
                message.message_type.as_str(),
                message.payload.to_string(),
                message.priority,
                message.created_at.to_rfc3339(),
                message.read_at.map(|t| t.to_rfc3339()),
                message.expires_at.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Unread, unexpired messages addressed to the agent or broadcast on a
    /// non-direct channel, ordered priority-weighted FIFO. When `mark_read`
    /// is set the read timestamp is written in the same transaction as the
    /// select.
    pub fn receive_messages(
        &self,
        agent_id: &str,
        channel: Option<Channel>,
        mark_read: bool,
    ) -> Result<Vec<AgentMessage>> {
        let tx = self.get_connection().unchecked_transaction()?;
        let now = Utc::now().to_rfc3339();

        let messages = {
            let mut sql = String::from(
                "SELECT id, channel, from_agent, to_agent, message_type,
                        payload, priority, created_at, read_at, expires_at
                 FROM agent_messages
                 WHERE read_at IS NULL
                   AND (expires_at IS NULL OR expires_at > ?1)
                   AND (to_agent = ?2 OR (to_agent IS NULL AND channel != 'direct'))
                   AND from_agent != ?2",
            );
            if channel.is_some() {
                sql.push_str(" AND channel = ?3");
            }
            sql.push_str(" ORDER BY priority DESC, created_at ASC");

            let mut stmt = tx.prepare(&sql)?;
            let mapper = |row: &Row| Ok(row_to_message(row));
            let rows = match channel {
                Some(ch) => stmt.query_map(params![&now, agent_id, ch.as_str()], mapper)?,
                None => stmt.query_map(params![&now, agent_id], mapper)?,
            };
            rows.collect::<Result<Vec<_>, _>>()?
        };

        if mark_read {
            for message in &messages {
                tx.execute(
                    "UPDATE agent_messages SET read_at = ?1 WHERE id = ?2",
                    params![&now, message.id],
                )?;
            }
        }

        tx.commit()?;
        Ok(messages)
    }

    /// Count of deliverable messages without consuming them
    pub fn pending_message_count(&self, agent_id: &str) -> Result<i64> {
        let count = self.get_connection().query_row(
            "SELECT COUNT(*) FROM agent_messages
             WHERE read_at IS NULL
               AND (expires_at IS NULL OR expires_at > ?1)
               AND (to_agent = ?2 OR (to_agent IS NULL AND channel != 'direct'))
               AND from_agent != ?2",
            params![Utc::now().to_rfc3339(), agent_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Garbage-collect rows past their expiry; returns the number removed
    pub fn delete_expired_messages(&self) -> Result<usize> {
        let changed = self.get_connection().execute(
            "DELETE FROM agent_messages
             WHERE expires_at IS NOT NULL AND expires_at <= ?1",
            params![Utc::now().to_rfc3339()],
        )?;
        Ok(changed)
    }
}

/// Convert a database row to an AgentMessage struct
fn row_to_message(row: &Row) -> AgentMessage {
    let channel: String = row.get(1).unwrap();
    let message_type: String = row.get(4).unwrap();
    let payload: String = row.get(5).unwrap();
    let created_at: String = row.get(7).unwrap();
    let read_at: Option<String> = row.get(8).unwrap();
    let expires_at: Option<String> = row.get(9).unwrap();

    AgentMessage {
        id: row.get(0).unwrap(),
        channel: Channel::parse(&channel).unwrap_or(Channel::Broadcast),
        from_agent: row.get(2).unwrap(),
        to_agent: row.get(3).unwrap(),
        message_type: MessageType::parse(&message_type).unwrap_or(MessageType::Notification),
        payload: serde_json::from_str(&payload).unwrap_or(serde_json::Value::Null),
        priority: row.get(6).unwrap(),
        created_at: super::parse_dt(&created_at),
        read_at: super::parse_dt_opt(read_at),
        expires_at: super::parse_dt_opt(expires_at),
    }
}
