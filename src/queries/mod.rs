//! Typed read-only projections over a decrypted Signal database

pub mod archive;
pub mod inspect;
pub mod models;
pub mod schema;

pub use archive::{like_pattern, SignalArchive};
pub use inspect::table_summaries;
pub use models::{
    ConversationStats, ConversationSummary, Message, MessagesPage, PageRequest, SearchRequest,
    TableSummary,
};
pub use schema::{SchemaContract, SearchFilters, MIN_SUPPORTED_VERSION, SERVICE_ID_VERSION};
