//! Fixtures shared by the test modules: encrypted Signal-shaped databases

use std::path::{Path, PathBuf};

use rusqlite::Connection;

use crate::database::SIGNAL_CIPHER;
use crate::keys::DatabaseKey;

/// `user_version` written into fixture databases
pub const FIXTURE_USER_VERSION: i64 = 1100;

pub fn zero_key() -> DatabaseKey {
    DatabaseKey::new(vec![0u8; 32]).unwrap()
}

const SCHEMA: &str = "
CREATE TABLE conversations (
    id STRING PRIMARY KEY ASC,
    json TEXT,
    active_at INTEGER,
    type STRING,
    members TEXT,
    name TEXT,
    profileName TEXT,
    profileFamilyName TEXT,
    e164 TEXT,
    serviceId TEXT,
    groupId TEXT
);
CREATE TABLE messages (
    rowid INTEGER PRIMARY KEY ASC,
    id STRING UNIQUE,
    json TEXT,
    readStatus INTEGER,
    sent_at INTEGER,
    schemaVersion INTEGER,
    conversationId STRING,
    received_at INTEGER,
    source STRING,
    hasAttachments INTEGER,
    type STRING,
    body TEXT,
    sourceServiceId TEXT,
    sourceDevice INTEGER
);
CREATE INDEX messages_conversation ON messages (conversationId, type, sent_at);
CREATE VIRTUAL TABLE messages_fts USING fts5(body);
CREATE TRIGGER messages_on_insert AFTER INSERT ON messages
WHEN new.body IS NOT NULL
BEGIN
    INSERT INTO messages_fts (rowid, body) VALUES (new.rowid, new.body);
END;
";

const SEED: &str = r#"
INSERT INTO conversations (id, json, active_at, type, name, profileName, e164) VALUES
    ('conv-alice', '{"id":"conv-alice","lastMessage":"See you tomorrow","unreadCount":2}', 1700000500000, 'private', 'Alice Smith', 'Alice', '+15550001'),
    ('conv-club', '{"id":"conv-club","lastMessage":"I loved chapter 2","unreadCount":0}', 1700000300000, 'group', 'Book Club', NULL, NULL),
    ('conv-bob', '{"id":"conv-bob"}', 1700000100000, 'private', NULL, 'Bob', '+15550002');

INSERT INTO messages (id, json, sent_at, conversationId, received_at, source, hasAttachments, type, body, sourceServiceId) VALUES
    ('msg-a1', '{}', 1700000001000, 'conv-alice', 1700000001500, NULL, 0, 'incoming', 'Hi there', 'svc-alice'),
    ('msg-a2', '{}', 1700000002000, 'conv-alice', 1700000002500, NULL, 0, 'outgoing', 'Hello Alice', 'svc-me'),
    ('msg-a3', '{}', 1700000003000, 'conv-alice', 1700000003500, NULL, 1, 'incoming', 'Are we still on for lunch?', 'svc-alice'),
    ('msg-a4', '{"quote":{"id":1700000003000,"text":"Are we still on for lunch?"}}', 1700000004000, 'conv-alice', 1700000004500, NULL, 0, 'outgoing', 'Yes, 12:30', 'svc-me'),
    ('msg-a5', '{}', 1700000005000, 'conv-alice', 1700000005500, NULL, 0, 'incoming', 'See you tomorrow', 'svc-alice'),
    ('msg-c1', '{}', 1700000200000, 'conv-club', 1700000200500, '+15550003', 0, 'incoming', 'Chapter 3 next', NULL),
    ('msg-c2', '{}', 1700000250000, 'conv-club', 1700000250500, NULL, 0, 'outgoing', 'I loved chapter 2', 'svc-me'),
    ('msg-b1', '{}', 1700000100000, 'conv-bob', 1700000100500, NULL, 0, 'incoming', 'I''m 100% sure_about it', 'svc-bob');
"#;

/// Key a fresh connection exactly the way Signal Desktop does
fn keyed(path: &Path, key: &DatabaseKey) -> Connection {
    let conn = Connection::open(path).unwrap();
    SIGNAL_CIPHER.apply(&conn, key).unwrap();
    conn
}

/// Write an encrypted Signal-shaped database to `<dir>/sql/db.sqlite`
pub fn create_signal_db(dir: &Path, key: &DatabaseKey) -> PathBuf {
    let sql_dir = dir.join("sql");
    std::fs::create_dir_all(&sql_dir).unwrap();
    let path = sql_dir.join("db.sqlite");

    let conn = keyed(&path, key);
    seed_signal_schema(&conn);
    path
}

/// Create and fill the Signal tables on any connection, encrypted or not
pub fn seed_signal_schema(conn: &Connection) {
    conn.execute_batch(SCHEMA).unwrap();
    conn.execute_batch(SEED).unwrap();
    conn.pragma_update(None, "user_version", FIXTURE_USER_VERSION)
        .unwrap();
}

/// Same as `create_signal_db`, with `messages_fts` declared using Signal's
/// private tokenizer
pub fn create_vendor_signal_db(dir: &Path, key: &DatabaseKey) -> PathBuf {
    let path = create_signal_db(dir, key);
    let conn = keyed(&path, key);
    install_vendor_tokenizer(&conn, "messages_fts");
    path
}

/// Rewrite a fts5 table's declaration to name `signal_tokenizer`.
///
/// SQLite refuses to create such a table without the tokenizer registered,
/// so the catalog is edited directly. Reopen the database afterwards.
pub fn install_vendor_tokenizer(conn: &Connection, table: &str) {
    conn.execute_batch("PRAGMA writable_schema = ON;").unwrap();
    conn.execute(
        "UPDATE sqlite_master
         SET sql = replace(sql, 'fts5(body)', 'fts5(body, tokenize = ''signal_tokenizer'')')
         WHERE name = ?1",
        [table],
    )
    .unwrap();
    conn.execute_batch("PRAGMA writable_schema = OFF;").unwrap();
}

/// Write a config.json with a literal key next to the fixture database
pub fn write_config(dir: &Path, key_hex: &str) -> PathBuf {
    let path = dir.join("config.json");
    std::fs::write(&path, format!(r#"{{"key":"{}","mediaPermissions":true}}"#, key_hex)).unwrap();
    path
}

/// A complete Signal directory (`config.json` + `sql/db.sqlite`) keyed with zeros
pub fn create_signal_dir(dir: &Path) {
    create_signal_db(dir, &zero_key());
    write_config(dir, &"0".repeat(64));
}
