//! Response and request models for archive queries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{ArchiveError, Result};

/// Summary of a conversation for the list view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationSummary {
    pub id: String,
    /// Display name: contact/group name, then profile name, then phone number
    pub name: String,
    /// "private" or "group"
    #[serde(rename = "type")]
    pub conversation_type: String,
    pub last_message: Option<String>,
    pub last_message_timestamp: Option<DateTime<Utc>>,
    pub message_count: i64,
    pub unread_count: i64,
}

/// A single message in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: Option<String>,
    pub body: Option<String>,
    pub timestamp: DateTime<Utc>,
    /// True if sent by the archive owner
    pub sent: bool,
    pub has_attachments: bool,
    /// Id of the quoted message, for replies
    pub quote_id: Option<String>,
}

/// One page of a conversation, newest first
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagesPage {
    pub messages: Vec<Message>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
    pub has_more: bool,
}

/// Validated 1-indexed pagination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: i64,
    page_size: i64,
}

impl PageRequest {
    pub const DEFAULT_PAGE_SIZE: i64 = 100;
    pub const MAX_PAGE_SIZE: i64 = 500;

    pub fn new(page: i64, page_size: i64) -> Result<Self> {
        if page < 1 {
            return Err(ArchiveError::InvalidRequest("Page must be >= 1".into()));
        }
        if !(1..=Self::MAX_PAGE_SIZE).contains(&page_size) {
            return Err(ArchiveError::InvalidRequest(format!(
                "Page size must be between 1 and {}",
                Self::MAX_PAGE_SIZE
            )));
        }
        Ok(Self { page, page_size })
    }

    pub fn page(&self) -> i64 {
        self.page
    }

    pub fn page_size(&self) -> i64 {
        self.page_size
    }

    pub fn offset(&self) -> i64 {
        (self.page - 1).saturating_mul(self.page_size)
    }
}

fn default_search_limit() -> i64 {
    SearchRequest::DEFAULT_LIMIT
}

/// Body of a message search
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
    #[serde(default = "default_search_limit")]
    pub limit: i64,
}

impl SearchRequest {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 200;

    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            conversation_id: None,
            start_date: None,
            end_date: None,
            limit: Self::DEFAULT_LIMIT,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.query.is_empty() {
            return Err(ArchiveError::InvalidRequest(
                "Search query must be at least 1 character".into(),
            ));
        }
        if !(1..=Self::MAX_LIMIT).contains(&self.limit) {
            return Err(ArchiveError::InvalidRequest(format!(
                "Limit must be between 1 and {}",
                Self::MAX_LIMIT
            )));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(ArchiveError::InvalidRequest(
                    "start_date must not be after end_date".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Per-conversation message statistics
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConversationStats {
    pub conversation_id: String,
    pub total_messages: i64,
    pub sent_messages: i64,
    pub received_messages: i64,
    pub first_message_date: Option<DateTime<Utc>>,
    pub last_message_date: Option<DateTime<Utc>>,
    /// Share of messages sent by the owner, rounded to a whole percent
    pub talk_more_percentage: i64,
}

/// Row count of one table, for schema inspection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TableSummary {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: i64,
}
