//! Read-only queries over a decrypted Signal database

use chrono::{DateTime, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

use super::models::{ConversationStats, ConversationSummary, Message, MessagesPage, PageRequest, SearchRequest};
use super::schema::{SchemaContract, SearchFilters};
use crate::errors::{ArchiveError, Result};

/// Typed view over one decrypted database connection
pub struct SignalArchive<'a> {
    conn: &'a Connection,
    schema: SchemaContract,
}

/// Render an id column as text.
///
/// Signal declares ids as `STRING`, which SQLite gives numeric affinity, so
/// digit-only ids come back as integers.
fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::Integer(i) => Some(i.to_string()),
        Value::Real(f) => Some(f.to_string()),
        Value::Text(s) => Some(s),
        Value::Blob(b) => Some(hex::encode(b)),
    }
}

fn value_to_i64(value: Value) -> i64 {
    match value {
        Value::Integer(i) => i,
        Value::Real(f) => f as i64,
        Value::Text(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn millis_to_datetime(millis: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    let timestamp_ms = value_to_i64(row.get(4)?);
    let message_type = value_to_string(row.get(5)?);

    Ok(Message {
        id: value_to_string(row.get(0)?).unwrap_or_default(),
        conversation_id: value_to_string(row.get(1)?).unwrap_or_default(),
        sender_id: value_to_string(row.get(2)?),
        body: value_to_string(row.get(3)?),
        timestamp: millis_to_datetime(timestamp_ms).unwrap_or_default(),
        sent: message_type.as_deref() == Some("outgoing"),
        has_attachments: value_to_i64(row.get(6)?) != 0,
        quote_id: value_to_string(row.get(7)?),
    })
}

/// Escape `\`, `%` and `_` so the query matches literally inside LIKE
pub fn like_pattern(query: &str) -> String {
    let mut escaped = String::with_capacity(query.len() + 2);
    escaped.push('%');
    for c in query.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    escaped
}

impl<'a> SignalArchive<'a> {
    pub fn new(conn: &'a Connection, schema: SchemaContract) -> Self {
        Self { conn, schema }
    }

    /// Detect and validate the schema, then wrap the connection
    pub fn open(conn: &'a Connection) -> Result<Self> {
        let schema = SchemaContract::detect(conn)?;
        Ok(Self::new(conn, schema))
    }

    pub fn schema(&self) -> &SchemaContract {
        &self.schema
    }

    pub fn conversation_count(&self) -> Result<i64> {
        let count = self
            .conn
            .query_row("SELECT count(*) FROM conversations", [], |row| row.get(0))?;
        Ok(count)
    }

    /// Conversations ordered by most recent activity
    pub fn conversations(&self, limit: i64) -> Result<Vec<ConversationSummary>> {
        if limit < 1 {
            return Err(ArchiveError::InvalidRequest("Limit must be >= 1".into()));
        }

        let mut stmt = self.conn.prepare(&self.schema.conversations_sql())?;
        let conversations = stmt
            .query_map(params![limit], |row| {
                let name = [row.get::<_, Value>(1)?, row.get(2)?, row.get(3)?]
                    .into_iter()
                    .filter_map(value_to_string)
                    .find(|s| !s.is_empty())
                    .unwrap_or_else(|| "Unknown".to_string());
                let active_at: Option<i64> = row.get::<_, Option<i64>>(5)?;

                Ok(ConversationSummary {
                    id: value_to_string(row.get(0)?).unwrap_or_else(|| "unknown".to_string()),
                    name,
                    conversation_type: value_to_string(row.get(4)?)
                        .unwrap_or_else(|| "private".to_string()),
                    last_message: value_to_string(row.get(6)?),
                    last_message_timestamp: active_at
                        .filter(|ms| *ms > 0)
                        .and_then(millis_to_datetime),
                    message_count: row.get(8)?,
                    unread_count: value_to_i64(row.get(7)?),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        log::debug!("Retrieved {} conversations", conversations.len());
        Ok(conversations)
    }

    /// One page of a conversation's messages, newest first
    pub fn messages(&self, conversation_id: &str, page: PageRequest) -> Result<MessagesPage> {
        let total: i64 = self.conn.query_row(
            self.schema.count_messages_sql(),
            params![conversation_id],
            |row| row.get(0),
        )?;

        let mut stmt = self.conn.prepare(&self.schema.messages_sql())?;
        let messages = stmt
            .query_map(
                params![conversation_id, page.page_size(), page.offset()],
                message_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let has_more = page.offset() + (messages.len() as i64) < total;
        log::debug!(
            "Retrieved {} messages for conversation {} (page {})",
            messages.len(),
            conversation_id,
            page.page()
        );

        Ok(MessagesPage {
            messages,
            total,
            page: page.page(),
            page_size: page.page_size(),
            has_more,
        })
    }

    /// Substring search over message bodies, newest first
    pub fn search(&self, request: &SearchRequest) -> Result<Vec<Message>> {
        request.validate()?;

        let filters = SearchFilters {
            conversation: request.conversation_id.is_some(),
            start: request.start_date.is_some(),
            end: request.end_date.is_some(),
        };

        let mut values = vec![Value::Text(like_pattern(&request.query))];
        if let Some(id) = &request.conversation_id {
            values.push(Value::Text(id.clone()));
        }
        if let Some(start) = request.start_date {
            values.push(Value::Integer(start.timestamp_millis()));
        }
        if let Some(end) = request.end_date {
            values.push(Value::Integer(end.timestamp_millis()));
        }
        values.push(Value::Integer(request.limit));

        let mut stmt = self.conn.prepare(&self.schema.search_sql(filters))?;
        let messages = stmt
            .query_map(params_from_iter(values), message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        log::info!("Search returned {} results", messages.len());
        Ok(messages)
    }

    /// Statistics for one conversation, or `None` when it has no messages
    pub fn conversation_stats(&self, conversation_id: &str) -> Result<Option<ConversationStats>> {
        let (total, sent, received, first, last): (i64, i64, i64, Option<i64>, Option<i64>) =
            self.conn.query_row(&self.schema.stats_sql(), params![conversation_id], |row| {
                Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
            })?;

        if total == 0 {
            return Ok(None);
        }

        let talk_more_percentage = ((sent as f64 / total as f64) * 100.0).round() as i64;

        Ok(Some(ConversationStats {
            conversation_id: conversation_id.to_string(),
            total_messages: total,
            sent_messages: sent,
            received_messages: received,
            first_message_date: first.and_then(millis_to_datetime),
            last_message_date: last.and_then(millis_to_datetime),
            talk_more_percentage,
        }))
    }
}
