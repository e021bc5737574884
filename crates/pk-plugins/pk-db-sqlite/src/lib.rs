//! # pk-db-sqlite Implementation
//!
//! This module implements the data mapping between the SQLite relational model
//! and the `pk-core` domain models.
//!
//! `posts.score` and `posts.num_flags` cache the sums of the `votes` and
//! `flags` ledgers. Every write that touches a ledger adjusts the cached total
//! inside the same transaction, starting with the `UPDATE posts` so the write
//! lock is held before the old ledger value is read.

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use pk_core::models::{Conversation, ConversationRow, Flag, NewPost, Post, PostRow, User, Vote};
use pk_core::traits::BoardRepo;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteBoardRepo {
    pool: SqlitePool,
}

/// The two per-(user, post) ledgers that feed a cached counter on `posts`.
#[derive(Debug, Clone, Copy)]
enum Ledger {
    Votes,
    Flags,
}

impl Ledger {
    fn table(self) -> &'static str {
        match self {
            Ledger::Votes => "votes",
            Ledger::Flags => "flags",
        }
    }

    fn counter(self) -> &'static str {
        match self {
            Ledger::Votes => "score",
            Ledger::Flags => "num_flags",
        }
    }
}

impl SqliteBoardRepo {
    /// Opens (creating if needed) the database and applies migrations.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        Self::connect(database_url, DEFAULT_MAX_CONNECTIONS).await
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> anyhow::Result<Self> {
        let in_memory = database_url.contains(":memory:") || database_url.contains("mode=memory");

        let mut options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .foreign_keys(true)
            .busy_timeout(BUSY_TIMEOUT);
        if !in_memory {
            options = options.journal_mode(SqliteJournalMode::Wal);
        }

        // Every connection to `sqlite::memory:` is its own database, so pin one
        // and never let it be recycled.
        let pool_options = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None::<Duration>)
                .max_lifetime(None::<Duration>)
        } else {
            SqlitePoolOptions::new().max_connections(max_connections.max(1))
        };

        let pool = pool_options.connect_with(options).await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Opened SQLite database {}", database_url);

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Upserts `username`'s entry in `ledger` for `post_id` and moves the
    /// post's cached counter by `value - old_value`.
    async fn rebalance(
        &self,
        ledger: Ledger,
        post_id: i64,
        username: &str,
        value: i64,
    ) -> anyhow::Result<Option<i64>> {
        let (table, counter) = (ledger.table(), ledger.counter());
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(&format!(
            "UPDATE posts SET {counter} = {counter} \
                 - COALESCE((SELECT value FROM {table} WHERE post_id = ? AND username = ?), 0) \
                 + ? \
             WHERE id = ?"
        ))
        .bind(post_id)
        .bind(username)
        .bind(value)
        .bind(post_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }

        sqlx::query(&format!(
            "INSERT INTO {table} (username, post_id, value) VALUES (?, ?, ?) \
             ON CONFLICT (username, post_id) DO UPDATE SET value = excluded.value"
        ))
        .bind(username)
        .bind(post_id)
        .bind(value)
        .execute(&mut *tx)
        .await?;

        let total: i64 = sqlx::query_scalar(&format!("SELECT {counter} FROM posts WHERE id = ?"))
            .bind(post_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        debug!("{} on post {} by {} -> {}={}", table, post_id, username, counter, total);
        Ok(Some(total))
    }
}

fn user_from_row(row: &SqliteRow) -> sqlx::Result<User> {
    Ok(User {
        username: row.try_get("username")?,
        password_hash: row.try_get("password_hash")?,
        device_token: row.try_get("device_token")?,
        deleted: row.try_get("deleted")?,
        is_moderator: row.try_get("is_moderator")?,
        created_at: row.try_get("created_at")?,
    })
}

fn post_from_row(row: &SqliteRow) -> sqlx::Result<Post> {
    Ok(Post {
        id: row.try_get("id")?,
        image: row.try_get("image")?,
        username: row.try_get("username")?,
        conversation_id: row.try_get("conversation_id")?,
        block: row.try_get("block")?,
        score: row.try_get("score")?,
        num_flags: row.try_get("num_flags")?,
        created_at: row.try_get("created_at")?,
    })
}

fn conversation_row_from_row(row: &SqliteRow) -> sqlx::Result<ConversationRow> {
    Ok(ConversationRow {
        conversation_id: row.try_get("conversation_id")?,
        post_id: row.try_get("post_id")?,
        image: row.try_get("image")?,
        score: row.try_get("score")?,
        user_score: row.try_get("user_score")?,
        created_at: row.try_get("created_at")?,
    })
}

fn post_row_from_row(row: &SqliteRow) -> sqlx::Result<PostRow> {
    Ok(PostRow {
        id: row.try_get("id")?,
        conversation_id: row.try_get("conversation_id")?,
        image: row.try_get("image")?,
        score: row.try_get("score")?,
        user_score: row.try_get("user_score")?,
        created_at: row.try_get("created_at")?,
    })
}

fn flag_from_row(row: &SqliteRow) -> sqlx::Result<Flag> {
    Ok(Flag {
        id: row.try_get("id")?,
        username: row.try_get("username")?,
        post_id: row.try_get("post_id")?,
        value: row.try_get("value")?,
    })
}

#[async_trait]
impl BoardRepo for SqliteBoardRepo {
    async fn create_user(&self, user: User) -> anyhow::Result<bool> {
        let inserted = sqlx::query(
            "INSERT INTO users (username, password_hash, device_token, deleted, is_moderator, created_at) \
             VALUES (?, ?, ?, ?, ?, ?) ON CONFLICT (username) DO NOTHING",
        )
        .bind(&user.username)
        .bind(&user.password_hash)
        .bind(&user.device_token)
        .bind(user.deleted)
        .bind(user.is_moderator)
        .bind(user.created_at)
        .execute(&self.pool)
        .await?
        .rows_affected();

        Ok(inserted == 1)
    }

    async fn get_user(&self, username: &str) -> anyhow::Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(user_from_row).transpose()?)
    }

    /// Deletes the user inside one transaction.
    ///
    /// # Developer Note
    /// The FK cascade removes the user's votes and flags, but the cached
    /// totals on other users' posts would keep their contribution. Those are
    /// withdrawn explicitly before the row goes.
    async fn delete_user(&self, username: &str) -> anyhow::Result<Option<Vec<String>>> {
        let mut tx = self.pool.begin().await?;

        // Write first to take the lock before reading the ledgers.
        let found = sqlx::query("UPDATE users SET deleted = 1 WHERE username = ?")
            .bind(username)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if found == 0 {
            return Ok(None);
        }

        for ledger in [Ledger::Votes, Ledger::Flags] {
            let (table, counter) = (ledger.table(), ledger.counter());
            sqlx::query(&format!(
                "UPDATE posts SET {counter} = {counter} - \
                     (SELECT COALESCE(SUM(l.value), 0) FROM {table} l \
                      WHERE l.post_id = posts.id AND l.username = ?) \
                 WHERE id IN (SELECT post_id FROM {table} WHERE username = ?)"
            ))
            .bind(username)
            .bind(username)
            .execute(&mut *tx)
            .await?;
        }

        let images: Vec<String> = sqlx::query_scalar("SELECT image FROM posts WHERE username = ?")
            .bind(username)
            .fetch_all(&mut *tx)
            .await?;

        // Cascades to posts, votes and flags.
        sqlx::query("DELETE FROM users WHERE username = ?")
            .bind(username)
            .execute(&mut *tx)
            .await?;

        let emptied = sqlx::query(
            "DELETE FROM conversations \
             WHERE NOT EXISTS (SELECT 1 FROM posts WHERE posts.conversation_id = conversations.id)",
        )
        .execute(&mut *tx)
        .await?
        .rows_affected();

        tx.commit().await?;
        debug!("Deleted user {} ({} conversations emptied)", username, emptied);
        Ok(Some(images))
    }

    async fn set_moderator(&self, username: &str, is_moderator: bool) -> anyhow::Result<bool> {
        let updated = sqlx::query("UPDATE users SET is_moderator = ? WHERE username = ?")
            .bind(is_moderator)
            .bind(username)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated == 1)
    }

    async fn get_conversation(&self, id: i64) -> anyhow::Result<Option<Conversation>> {
        let row = sqlx::query("SELECT id, block FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Conversation {
                id: row.try_get("id")?,
                block: row.try_get("block")?,
            })),
            None => Ok(None),
        }
    }

    async fn root_post_id(&self, conversation_id: i64) -> anyhow::Result<Option<i64>> {
        let id: Option<i64> = sqlx::query_scalar("SELECT MIN(id) FROM posts WHERE conversation_id = ?")
            .bind(conversation_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(id)
    }

    /// Atomic operation to create a conversation (if needed) and its post.
    ///
    /// # Developer Note
    /// Using a Transaction (tx) ensures we don't end up with "ghost
    /// conversations" that have no root post if the second insert fails.
    async fn create_post(&self, post: NewPost) -> anyhow::Result<Post> {
        let mut tx = self.pool.begin().await?;

        let conversation_id = match post.conversation_id {
            Some(id) => id,
            None => sqlx::query("INSERT INTO conversations (block) VALUES (0)")
                .execute(&mut *tx)
                .await?
                .last_insert_rowid(),
        };

        let created_at = Utc::now();
        let id = sqlx::query(
            "INSERT INTO posts (image, username, conversation_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&post.image)
        .bind(&post.username)
        .bind(conversation_id)
        .bind(created_at)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();

        tx.commit().await?;

        Ok(Post {
            id,
            image: post.image,
            username: post.username,
            conversation_id,
            block: false,
            score: 0,
            num_flags: 0,
            created_at,
        })
    }

    async fn get_post(&self, id: i64) -> anyhow::Result<Option<Post>> {
        let row = sqlx::query("SELECT * FROM posts WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(post_from_row).transpose()?)
    }

    async fn list_conversations(
        &self,
        viewer: Option<String>,
        score_floor: i64,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<ConversationRow>> {
        let rows = sqlx::query(
            "SELECT c.id AS conversation_id, p.id AS post_id, p.image, p.score, p.created_at, \
                    COALESCE((SELECT v.value FROM votes v WHERE v.post_id = p.id AND v.username = ?), 0) \
                        AS user_score \
             FROM conversations c \
             JOIN posts p ON p.id = (SELECT MIN(id) FROM posts WHERE conversation_id = c.id) \
             WHERE c.block = 0 AND p.block = 0 AND p.score > ? \
             ORDER BY c.id DESC \
             LIMIT ? OFFSET ?",
        )
        .bind(viewer)
        .bind(score_floor)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(conversation_row_from_row).collect::<sqlx::Result<_>>()?)
    }

    async fn list_posts(
        &self,
        conversation_id: i64,
        viewer: Option<String>,
        score_floor: i64,
        limit: i64,
        offset: i64,
    ) -> anyhow::Result<Vec<PostRow>> {
        let rows = sqlx::query(
            "SELECT p.id, p.conversation_id, p.image, p.score, p.created_at, \
                    COALESCE((SELECT v.value FROM votes v WHERE v.post_id = p.id AND v.username = ?), 0) \
                        AS user_score \
             FROM posts p \
             JOIN conversations c ON c.id = p.conversation_id \
             WHERE p.conversation_id = ? AND c.block = 0 AND p.block = 0 AND p.score > ? \
             ORDER BY p.id ASC \
             LIMIT ? OFFSET ?",
        )
        .bind(viewer)
        .bind(conversation_id)
        .bind(score_floor)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(post_row_from_row).collect::<sqlx::Result<_>>()?)
    }

    async fn set_vote(&self, post_id: i64, username: &str, value: i64) -> anyhow::Result<Option<i64>> {
        self.rebalance(Ledger::Votes, post_id, username, value).await
    }

    async fn clear_vote(&self, post_id: i64, username: &str) -> anyhow::Result<Option<i64>> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE posts SET score = score - \
                 (SELECT value FROM votes WHERE post_id = ? AND username = ?) \
             WHERE id = ? AND EXISTS (SELECT 1 FROM votes WHERE post_id = ? AND username = ?)",
        )
        .bind(post_id)
        .bind(username)
        .bind(post_id)
        .bind(post_id)
        .bind(username)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if updated == 0 {
            return Ok(None);
        }

        sqlx::query("DELETE FROM votes WHERE post_id = ? AND username = ?")
            .bind(post_id)
            .bind(username)
            .execute(&mut *tx)
            .await?;

        let score: i64 = sqlx::query_scalar("SELECT score FROM posts WHERE id = ?")
            .bind(post_id)
            .fetch_one(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(score))
    }

    async fn find_vote(&self, post_id: i64, username: &str) -> anyhow::Result<Option<Vote>> {
        let row = sqlx::query("SELECT * FROM votes WHERE post_id = ? AND username = ?")
            .bind(post_id)
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Vote {
                id: row.try_get("id")?,
                username: row.try_get("username")?,
                post_id: row.try_get("post_id")?,
                value: row.try_get("value")?,
            })),
            None => Ok(None),
        }
    }

    async fn set_flag(&self, post_id: i64, username: &str, value: i64) -> anyhow::Result<Option<i64>> {
        self.rebalance(Ledger::Flags, post_id, username, value).await
    }

    async fn clear_flags(&self, post_id: i64) -> anyhow::Result<bool> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query("UPDATE posts SET num_flags = 0 WHERE id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        if updated == 0 {
            return Ok(false);
        }

        sqlx::query("DELETE FROM flags WHERE post_id = ?")
            .bind(post_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    async fn list_flags(&self, post_id: i64) -> anyhow::Result<Vec<Flag>> {
        let rows = sqlx::query("SELECT * FROM flags WHERE post_id = ? ORDER BY id ASC")
            .bind(post_id)
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(flag_from_row).collect::<sqlx::Result<_>>()?)
    }

    async fn set_post_blocked(&self, post_id: i64, blocked: bool) -> anyhow::Result<bool> {
        let updated = sqlx::query("UPDATE posts SET block = ? WHERE id = ?")
            .bind(blocked)
            .bind(post_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated == 1)
    }

    async fn set_conversation_blocked(&self, conversation_id: i64, blocked: bool) -> anyhow::Result<bool> {
        let updated = sqlx::query("UPDATE conversations SET block = ? WHERE id = ?")
            .bind(blocked)
            .bind(conversation_id)
            .execute(&self.pool)
            .await?
            .rows_affected();
        Ok(updated == 1)
    }
}
