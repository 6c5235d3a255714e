//! Versioned column mapping for Signal's `conversations` and `messages` tables.
//!
//! Signal Desktop records its migration level in `PRAGMA user_version`. The
//! sender column was renamed twice over the years; everything else read
//! here has been stable since the oldest supported version.

use rusqlite::Connection;

use crate::errors::{ArchiveError, Result};

/// Oldest migration level with the columns read here
pub const MIN_SUPPORTED_VERSION: i64 = 41;

/// First migration level where senders are stored as service ids
pub const SERVICE_ID_VERSION: i64 = 88;

/// Column mapping chosen for one database
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaContract {
    pub user_version: i64,
    /// Column holding the sender's account id
    pub sender_column: &'static str,
}

/// Optional filters of a message search
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SearchFilters {
    pub conversation: bool,
    pub start: bool,
    pub end: bool,
}

impl SearchFilters {
    pub const ALL: Self = Self {
        conversation: true,
        start: true,
        end: true,
    };
}

impl SchemaContract {
    pub fn for_version(user_version: i64) -> Result<Self> {
        let sender_column = if user_version >= SERVICE_ID_VERSION {
            "sourceServiceId"
        } else if user_version >= MIN_SUPPORTED_VERSION {
            "sourceUuid"
        } else {
            return Err(ArchiveError::SchemaMismatch(format!(
                "user_version {} predates the oldest supported schema ({})",
                user_version, MIN_SUPPORTED_VERSION
            )));
        };

        Ok(Self {
            user_version,
            sender_column,
        })
    }

    /// Pick the mapping from the database's `user_version` and check that
    /// every projection compiles against the actual tables
    pub fn detect(conn: &Connection) -> Result<Self> {
        let user_version: i64 =
            conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        let contract = Self::for_version(user_version)?;
        contract.validate(conn)?;
        log::info!(
            "Signal schema version {} (sender column {})",
            user_version,
            contract.sender_column
        );
        Ok(contract)
    }

    pub fn validate(&self, conn: &Connection) -> Result<()> {
        let projections = [
            ("conversations", self.conversations_sql()),
            ("messages", self.messages_sql()),
            ("search", self.search_sql(SearchFilters::ALL)),
            ("stats", self.stats_sql()),
        ];
        for (name, sql) in projections {
            conn.prepare(&sql).map_err(|e| {
                ArchiveError::SchemaMismatch(format!("{} projection: {}", name, e))
            })?;
        }
        Ok(())
    }

    fn message_columns(&self) -> String {
        format!(
            "m.id, m.conversationId, COALESCE(m.{sender}, m.source), m.body, \
             COALESCE(m.sent_at, m.received_at, 0), m.type, m.hasAttachments, \
             CASE WHEN json_valid(m.json) THEN json_extract(m.json, '$.quote.id') END",
            sender = self.sender_column
        )
    }

    /// Conversations by recent activity; `?1` is the limit
    pub fn conversations_sql(&self) -> String {
        "SELECT c.id, c.name, c.profileName, c.e164, c.type, c.active_at, \
         CASE WHEN json_valid(c.json) THEN json_extract(c.json, '$.lastMessage') END, \
         CASE WHEN json_valid(c.json) THEN json_extract(c.json, '$.unreadCount') END, \
         (SELECT count(*) FROM messages m WHERE m.conversationId = c.id) \
         FROM conversations c \
         ORDER BY c.active_at DESC \
         LIMIT ?1"
            .to_string()
    }

    /// One page of a conversation; `?1` id, `?2` limit, `?3` offset
    pub fn messages_sql(&self) -> String {
        format!(
            "SELECT {} FROM messages m \
             WHERE m.conversationId = ?1 \
             ORDER BY m.sent_at DESC, m.received_at DESC \
             LIMIT ?2 OFFSET ?3",
            self.message_columns()
        )
    }

    pub fn count_messages_sql(&self) -> &'static str {
        "SELECT count(*) FROM messages WHERE conversationId = ?1"
    }

    /// Body search; parameters are numbered in order: pattern, then each
    /// enabled filter, then the limit
    pub fn search_sql(&self, filters: SearchFilters) -> String {
        let mut sql = format!(
            "SELECT {} FROM messages m WHERE m.body LIKE ?1 ESCAPE '\\'",
            self.message_columns()
        );
        let mut index = 2;
        if filters.conversation {
            sql.push_str(&format!(" AND m.conversationId = ?{}", index));
            index += 1;
        }
        if filters.start {
            sql.push_str(&format!(" AND m.sent_at >= ?{}", index));
            index += 1;
        }
        if filters.end {
            sql.push_str(&format!(" AND m.sent_at <= ?{}", index));
            index += 1;
        }
        sql.push_str(&format!(
            " ORDER BY m.sent_at DESC, m.received_at DESC LIMIT ?{}",
            index
        ));
        sql
    }

    /// Aggregate counts for one conversation; `?1` is the id
    pub fn stats_sql(&self) -> String {
        "SELECT count(*), \
         COALESCE(sum(type = 'outgoing'), 0), \
         COALESCE(sum(type = 'incoming'), 0), \
         min(sent_at), max(sent_at) \
         FROM messages WHERE conversationId = ?1"
            .to_string()
    }
}
