//! # BoardService
//!
//! Every business rule of Pikyak lives here: who may do what, how votes and
//! flags land on posts, and what listings show. The service only talks to
//! the ports in [`crate::traits`], so any combination of plugins can back it.

use crate::error::{AppError, Result};
use crate::models::*;
use crate::traits::{AuthProvider, BoardRepo, MediaStore};
use chrono::Utc;
use log::{info, warn};
use std::path::Path;

const MAX_USERNAME_LEN: usize = 255;
const MAX_EXTENSION_LEN: usize = 8;

pub struct BoardService {
    repo: Box<dyn BoardRepo>,
    store: Box<dyn MediaStore>,
    auth: Box<dyn AuthProvider>,
}

impl BoardService {
    pub fn new(
        repo: Box<dyn BoardRepo>,
        store: Box<dyn MediaStore>,
        auth: Box<dyn AuthProvider>,
    ) -> Self {
        Self { repo, store, auth }
    }

    // ── Identity ────────────────────────────────────────────────────────────

    /// Verifies credentials and binds them to a caller identity.
    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Caller> {
        let rejected = || AppError::Unauthorized("invalid username or password".to_string());

        let user = self
            .repo
            .get_user(&credentials.username)
            .await?
            .filter(|u| !u.deleted)
            .ok_or_else(rejected)?;

        if !self
            .auth
            .verify_password(&credentials.password, &user.password_hash)
            .await
        {
            return Err(rejected());
        }

        Ok(Caller {
            username: user.username,
            is_moderator: user.is_moderator,
        })
    }

    /// Registers `username`. The presented credentials must name the same user;
    /// their password becomes the account password.
    pub async fn register(
        &self,
        credentials: Option<&Credentials>,
        username: &str,
        device_token: Option<String>,
    ) -> Result<()> {
        let credentials = credentials
            .filter(|c| c.username == username)
            .ok_or_else(|| {
                AppError::ValidationError(
                    "basic-auth username must match the registered username".to_string(),
                )
            })?;
        validate_username(username)?;
        if credentials.password.is_empty() {
            return Err(AppError::ValidationError("password must not be empty".to_string()));
        }

        let user = User {
            username: username.to_string(),
            password_hash: self.auth.hash_password(&credentials.password).await?,
            device_token,
            deleted: false,
            is_moderator: false,
            created_at: Utc::now(),
        };

        if !self.repo.create_user(user).await? {
            return Err(AppError::Conflict(format!("username {username} is already registered")));
        }
        info!("Registered user {}", username);
        Ok(())
    }

    /// Deletes the caller's own account along with their posts, votes and flags.
    pub async fn deregister(&self, caller: &Caller, username: &str) -> Result<()> {
        if caller.username != username {
            return Err(AppError::Forbidden("users may only deregister themselves".to_string()));
        }

        let images = self
            .repo
            .delete_user(username)
            .await?
            .ok_or_else(|| AppError::not_found("User", username))?;

        // The rows are gone already; a leftover blob is only wasted space.
        for media_id in &images {
            if let Err(e) = self.store.delete(media_id).await {
                warn!("Failed to remove image {} of deleted user {}: {:#}", media_id, username, e);
            }
        }
        info!("Deregistered user {} ({} posts removed)", username, images.len());
        Ok(())
    }

    pub async fn profile(&self, caller: &Caller, username: &str) -> Result<Profile> {
        if caller.username != username {
            return Err(AppError::ValidationError("only your own profile can be fetched".to_string()));
        }
        let user = self
            .repo
            .get_user(username)
            .await?
            .ok_or_else(|| AppError::not_found("User", username))?;

        Ok(Profile {
            user_id: user.username,
            is_moderator: user.is_moderator,
        })
    }

    /// Grants or revokes moderator rights. Administrative; not exposed over HTTP.
    pub async fn set_moderator(&self, username: &str, is_moderator: bool) -> Result<()> {
        if !self.repo.set_moderator(username, is_moderator).await? {
            return Err(AppError::not_found("User", username));
        }
        info!("Set moderator={} for user {}", is_moderator, username);
        Ok(())
    }

    // ── Posting ─────────────────────────────────────────────────────────────

    /// Stores the image and attaches a new post to `conversation_id`, or to a
    /// fresh conversation when none is given.
    pub async fn create_post(
        &self,
        caller: &Caller,
        conversation_id: Option<i64>,
        upload: ImageUpload,
    ) -> Result<CreatedPost> {
        if upload.data.is_empty() {
            return Err(AppError::ValidationError("image must not be empty".to_string()));
        }
        let detected = self
            .store
            .detect_format(&upload.data)
            .ok_or_else(|| AppError::ValidationError("unsupported image format".to_string()))?;
        // The client's spelling survives only if it names the sniffed format;
        // the stored extension decides the content type images are served with.
        let extension = upload
            .file_name
            .as_deref()
            .and_then(file_extension)
            .filter(|ext| self.store.format_of_extension(ext).as_deref() == Some(detected.as_str()))
            .unwrap_or(detected);

        if let Some(id) = conversation_id {
            self.repo
                .get_conversation(id)
                .await?
                .filter(|c| !c.block)
                .ok_or_else(|| {
                    AppError::ValidationError(format!("conversation {id} is not in the database"))
                })?;
        }

        let media_id = self.store.save_upload(upload.data, &extension).await?;
        let new_post = NewPost {
            username: caller.username.clone(),
            conversation_id,
            image: media_id.clone(),
        };

        let post = match self.repo.create_post(new_post).await {
            Ok(post) => post,
            Err(e) => {
                if let Err(cleanup) = self.store.delete(&media_id).await {
                    warn!("Failed to remove orphaned image {}: {:#}", media_id, cleanup);
                }
                return Err(e.into());
            }
        };

        info!(
            "User {} posted {} in conversation {}",
            caller.username, post.id, post.conversation_id
        );
        Ok(CreatedPost {
            id: post.id,
            conversation_id: post.conversation_id,
        })
    }

    // ── Voting ──────────────────────────────────────────────────────────────

    pub async fn set_vote(&self, caller: &Caller, target: Target, value: i64) -> Result<ScoreUpdate> {
        if value.abs() != 1 {
            return Err(AppError::ValidationError("vote value must be -1 or +1".to_string()));
        }
        let post_id = self.resolve_post(target).await?.ok_or_else(|| missing(target))?;
        let score = self
            .repo
            .set_vote(post_id, &caller.username, value)
            .await?
            .ok_or_else(|| AppError::not_found("Post", post_id))?;

        Ok(ScoreUpdate {
            post_id,
            score,
            user_score: value,
        })
    }

    pub async fn clear_vote(&self, caller: &Caller, target: Target) -> Result<ScoreUpdate> {
        let post_id = self.resolve_post(target).await?.ok_or_else(|| missing(target))?;
        let score = self
            .repo
            .clear_vote(post_id, &caller.username)
            .await?
            .ok_or_else(|| AppError::not_found("Vote", format!("{}/{}", post_id, caller.username)))?;

        Ok(ScoreUpdate {
            post_id,
            score,
            user_score: 0,
        })
    }

    /// The caller's own vote on the target together with its current score.
    pub async fn user_score(&self, caller: &Caller, target: Target) -> Result<ScoreUpdate> {
        let post_id = self.resolve_post(target).await?.ok_or_else(|| missing(target))?;
        let post = self
            .repo
            .get_post(post_id)
            .await?
            .ok_or_else(|| AppError::not_found("Post", post_id))?;
        let vote = self.repo.find_vote(post_id, &caller.username).await?;

        Ok(ScoreUpdate {
            post_id,
            score: post.score,
            user_score: vote.map_or(0, |v| v.value),
        })
    }

    // ── Flagging ────────────────────────────────────────────────────────────

    pub async fn set_flag(&self, caller: &Caller, target: Target) -> Result<FlagUpdate> {
        let unknown = || AppError::ValidationError(format!("{target} is not in the database"));
        let post_id = self.resolve_post(target).await?.ok_or_else(unknown)?;
        let num_flags = self
            .repo
            .set_flag(post_id, &caller.username, FLAG_WEIGHT)
            .await?
            .ok_or_else(unknown)?;

        info!("User {} flagged post {}", caller.username, post_id);
        Ok(FlagUpdate { post_id, num_flags })
    }

    pub async fn clear_flags(&self, caller: &Caller, target: Target) -> Result<()> {
        require_moderator(caller, "clear flags")?;
        let unknown = || AppError::ValidationError(format!("{target} is not in the database"));
        let post_id = self.resolve_post(target).await?.ok_or_else(unknown)?;
        if !self.repo.clear_flags(post_id).await? {
            return Err(unknown());
        }
        info!("Moderator {} cleared flags on post {}", caller.username, post_id);
        Ok(())
    }

    pub async fn list_flags(&self, caller: &Caller, target: Target) -> Result<Vec<Flag>> {
        require_moderator(caller, "list flags")?;
        let post_id = self.resolve_post(target).await?.ok_or_else(|| missing(target))?;
        if self.repo.get_post(post_id).await?.is_none() {
            return Err(AppError::not_found("Post", post_id));
        }
        Ok(self.repo.list_flags(post_id).await?)
    }

    // ── Moderation ──────────────────────────────────────────────────────────

    /// Hides (`blocked = true`) or restores content. Nothing is deleted.
    pub async fn set_blocked(&self, caller: &Caller, target: Target, blocked: bool) -> Result<()> {
        require_moderator(caller, "block content")?;
        let found = match target {
            Target::Post(id) => self.repo.set_post_blocked(id, blocked).await?,
            Target::Conversation(id) => self.repo.set_conversation_blocked(id, blocked).await?,
        };
        if !found {
            return Err(AppError::ValidationError(format!("{target} is not in the database")));
        }
        info!("Moderator {} set block={} on {}", caller.username, blocked, target);
        Ok(())
    }

    // ── Listing ─────────────────────────────────────────────────────────────

    pub async fn list_conversations(
        &self,
        viewer: Option<&Caller>,
        first: i64,
    ) -> Result<Vec<ConversationSummary>> {
        check_offset(first)?;
        let rows = self
            .repo
            .list_conversations(viewer.map(|c| c.username.clone()), SCORE_FLOOR, PAGE_SIZE, first)
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| ConversationSummary {
                id: row.conversation_id,
                post_id: row.post_id,
                image_url: self.store.get_url(&row.image),
                score: row.score,
                user_score: viewer.map(|_| row.user_score),
                created_at: row.created_at,
            })
            .collect())
    }

    pub async fn list_posts(
        &self,
        viewer: Option<&Caller>,
        conversation_id: i64,
        first: i64,
    ) -> Result<Vec<PostSummary>> {
        check_offset(first)?;
        let rows = self
            .repo
            .list_posts(
                conversation_id,
                viewer.map(|c| c.username.clone()),
                SCORE_FLOOR,
                PAGE_SIZE,
                first,
            )
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| PostSummary {
                id: row.id,
                conversation_id: row.conversation_id,
                image_url: self.store.get_url(&row.image),
                score: row.score,
                user_score: viewer.map(|_| row.user_score),
                created_at: row.created_at,
            })
            .collect())
    }

    pub async fn load_image(&self, media_id: &str) -> Result<Vec<u8>> {
        self.store
            .load(media_id)
            .await?
            .ok_or_else(|| AppError::not_found("Image", media_id))
    }

    /// Maps a target onto the post that carries its score and flags.
    async fn resolve_post(&self, target: Target) -> Result<Option<i64>> {
        match target {
            Target::Post(id) => Ok(Some(id)),
            Target::Conversation(id) => Ok(self.repo.root_post_id(id).await?),
        }
    }
}

fn missing(target: Target) -> AppError {
    match target {
        Target::Post(id) => AppError::not_found("Post", id),
        Target::Conversation(id) => AppError::not_found("Conversation", id),
    }
}

fn require_moderator(caller: &Caller, action: &str) -> Result<()> {
    if caller.is_moderator {
        return Ok(());
    }
    warn!("User {} tried to {} without moderator rights", caller.username, action);
    Err(AppError::Forbidden(format!("only moderators may {action}")))
}

fn check_offset(first: i64) -> Result<()> {
    if first < 0 {
        return Err(AppError::ValidationError("first must not be negative".to_string()));
    }
    Ok(())
}

fn validate_username(username: &str) -> Result<()> {
    let valid = !username.is_empty()
        && username.chars().count() <= MAX_USERNAME_LEN
        && !username.chars().any(|c| c == ':' || c.is_whitespace() || c.is_control());
    if !valid {
        return Err(AppError::ValidationError(format!("invalid username {username:?}")));
    }
    Ok(())
}

/// Lowercased extension of a client file name, if it is short and alphanumeric.
fn file_extension(file_name: &str) -> Option<String> {
    let ext = Path::new(file_name).extension()?.to_str()?;
    let usable = !ext.is_empty()
        && ext.len() <= MAX_EXTENSION_LEN
        && ext.chars().all(|c| c.is_ascii_alphanumeric());
    usable.then(|| ext.to_ascii_lowercase())
}
