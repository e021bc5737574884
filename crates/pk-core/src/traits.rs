//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.
//! Absence is reported through `Option`/`bool`; `Err` is reserved for
//! infrastructure failures.

use crate::models::{Conversation, ConversationRow, Flag, NewPost, Post, PostRow, User, Vote};
use async_trait::async_trait;

/// Data persistence contract for users, conversations, posts, votes and flags.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BoardRepo: Send + Sync {
    // User Operations

    /// Inserts a user. Returns `false` if the username is already taken.
    async fn create_user(&self, user: User) -> anyhow::Result<bool>;
    async fn get_user(&self, username: &str) -> anyhow::Result<Option<User>>;
    /// Deletes a user with everything they own and withdraws their votes and
    /// flags from the cached post totals. Returns the media ids of the removed
    /// posts, or `None` if the user does not exist.
    async fn delete_user(&self, username: &str) -> anyhow::Result<Option<Vec<String>>>;
    async fn set_moderator(&self, username: &str, is_moderator: bool) -> anyhow::Result<bool>;

    // Conversation / Post Operations
    async fn get_conversation(&self, id: i64) -> anyhow::Result<Option<Conversation>>;
    /// Lowest-id post of the conversation.
    async fn root_post_id(&self, conversation_id: i64) -> anyhow::Result<Option<i64>>;
    /// Inserts the post, opening a new conversation when `conversation_id` is `None`.
    async fn create_post(&self, post: NewPost) -> anyhow::Result<Post>;
    async fn get_post(&self, id: i64) -> anyhow::Result<Option<Post>>;
    /// Newest first. `viewer` selects whose vote is reported in `user_score`.
    async fn list_conversations(
        &self,
        viewer: Option<String>,
        score_floor: i64,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<ConversationRow>>;
    /// Oldest first.
    async fn list_posts(
        &self,
        conversation_id: i64,
        viewer: Option<String>,
        score_floor: i64,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<PostRow>>;

    // Vote Operations

    /// Upserts the vote and rebalances the post score atomically.
    /// Returns the new score, or `None` if the post does not exist.
    async fn set_vote(&self, post_id: i64, username: &str, value: i64) -> anyhow::Result<Option<i64>>;
    /// Removes the vote and its contribution. `None` if there was no vote.
    async fn clear_vote(&self, post_id: i64, username: &str) -> anyhow::Result<Option<i64>>;
    async fn find_vote(&self, post_id: i64, username: &str) -> anyhow::Result<Option<Vote>>;

    // Flag Operations

    /// Same contract as `set_vote`, applied to the flag count.
    async fn set_flag(&self, post_id: i64, username: &str, value: i64) -> anyhow::Result<Option<i64>>;
    /// Drops every flag on the post and zeroes its count. `false` if the post does not exist.
    async fn clear_flags(&self, post_id: i64) -> anyhow::Result<bool>;
    async fn list_flags(&self, post_id: i64) -> anyhow::Result<Vec<Flag>>;

    // Moderation
    async fn set_post_blocked(&self, post_id: i64, blocked: bool) -> anyhow::Result<bool>;
    async fn set_conversation_blocked(&self, conversation_id: i64, blocked: bool) -> anyhow::Result<bool>;
}

/// Media storage contract for uploaded images.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait MediaStore: Send + Sync {
    /// Sniffs the image format from magic bytes and returns its canonical extension.
    fn detect_format(&self, data: &[u8]) -> Option<String>;
    /// Canonical extension of the supported format that `extension` names, if any.
    fn format_of_extension(&self, extension: &str) -> Option<String>;
    /// Saves raw bytes under a fresh collision-resistant name and returns the media id.
    async fn save_upload(&self, data: Vec<u8>, extension: &str) -> anyhow::Result<String>;
    /// Returns the stored bytes, or `None` for unknown or malformed ids.
    async fn load(&self, media_id: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn delete(&self, media_id: &str) -> anyhow::Result<()>;
    /// Returns the public URL of the media.
    fn get_url(&self, media_id: &str) -> String;
}

/// Password hashing and verification contract.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Produces a salted hash suitable for storage.
    async fn hash_password(&self, password: &str) -> anyhow::Result<String>;

    /// Verifies a password against a stored hash.
    async fn verify_password(&self, password: &str, hash: &str) -> bool;
}
