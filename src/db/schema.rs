//! Database schema

/// SQL schema for initialization
///
/// Responses are keyed by `(conversation_id, purpose)` so each answer is an
/// independent row: writers for different purposes never overwrite each other.
/// A recording URL is stored at most once per conversation.
pub const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS rulesets (
    id TEXT PRIMARY KEY,
    body TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    ruleset_id TEXT NOT NULL,
    done BOOLEAN NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS responses (
    conversation_id TEXT NOT NULL,
    purpose TEXT NOT NULL,
    answer TEXT NOT NULL,
    updated_at TEXT NOT NULL,

    PRIMARY KEY (conversation_id, purpose)
);

CREATE TABLE IF NOT EXISTS recordings (
    sequence_id INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id TEXT NOT NULL,
    url TEXT NOT NULL,
    purpose TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_recordings_conversation ON recordings(conversation_id, sequence_id);
CREATE UNIQUE INDEX IF NOT EXISTS idx_recordings_url ON recordings(conversation_id, url);
";
