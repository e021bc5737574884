//! # Domain Models
//!
//! These structs represent the core entities of Pikyak.
//! Conversations and posts use auto-increment integer ids; users are keyed
//! by username.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of entries returned by every listing call.
pub const PAGE_SIZE: i64 = 10;

/// Content scoring at or below this value is hidden from listings.
pub const SCORE_FLOOR: i64 = -5;

/// Every flag counts the same; there are no negative flags.
pub const FLAG_WEIGHT: i64 = 1;

/// A registered account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    /// PHC-formatted password hash produced by the `AuthProvider`
    #[serde(skip_serializing)]
    pub password_hash: String,
    /// Push-notification token of the user's device, if any
    pub device_token: Option<String>,
    pub deleted: bool,
    pub is_moderator: bool,
    pub created_at: DateTime<Utc>,
}

/// A thread of posts. Created implicitly with its first post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: i64,
    pub block: bool,
}

/// An image posted into a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: i64,
    /// Media id handed out by the `MediaStore`
    pub image: String,
    pub username: String,
    pub conversation_id: i64,
    pub block: bool,
    /// Cached sum of the post's vote ledger
    pub score: i64,
    /// Cached sum of the post's flag ledger
    pub num_flags: i64,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for a post. `conversation_id: None` opens a new conversation.
#[derive(Debug, Clone)]
pub struct NewPost {
    pub username: String,
    pub conversation_id: Option<i64>,
    pub image: String,
}

/// One user's vote on one post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub id: i64,
    pub username: String,
    pub post_id: i64,
    pub value: i64,
}

/// One user's flag on one post.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flag {
    pub id: i64,
    pub username: String,
    pub post_id: i64,
    pub value: i64,
}

/// Username/password pair as presented by a client.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// An authenticated identity bound to the current request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub username: String,
    pub is_moderator: bool,
}

/// What a vote, flag, or block is aimed at.
///
/// Votes and flags on a conversation land on its root post; blocks apply to
/// the conversation itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    Post(i64),
    Conversation(i64),
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Post(id) => write!(f, "post {id}"),
            Target::Conversation(id) => write!(f, "conversation {id}"),
        }
    }
}

/// Raw image bytes received from a client.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub data: Vec<u8>,
    /// Client-side file name, used only for its extension
    pub file_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatedPost {
    pub id: i64,
    pub conversation_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: String,
    pub is_moderator: bool,
}

/// A post's score together with the caller's own vote on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreUpdate {
    pub post_id: i64,
    pub score: i64,
    pub user_score: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagUpdate {
    pub post_id: i64,
    pub num_flags: i64,
}

/// Listing row for a conversation, as read from the store.
#[derive(Debug, Clone)]
pub struct ConversationRow {
    pub conversation_id: i64,
    pub post_id: i64,
    pub image: String,
    pub score: i64,
    /// The viewer's vote on the root post, 0 if none or anonymous
    pub user_score: i64,
    pub created_at: DateTime<Utc>,
}

/// Listing row for a post, as read from the store.
#[derive(Debug, Clone)]
pub struct PostRow {
    pub id: i64,
    pub conversation_id: i64,
    pub image: String,
    pub score: i64,
    pub user_score: i64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: i64,
    pub post_id: i64,
    pub image_url: String,
    pub score: i64,
    /// Present only when the listing was requested with credentials
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_score: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostSummary {
    pub id: i64,
    pub conversation_id: i64,
    pub image_url: String,
    pub score: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_score: Option<i64>,
    pub created_at: DateTime<Utc>,
}
