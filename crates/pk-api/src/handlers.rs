//! # pk-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the core
//! `BoardService`. Handlers only extract input and pick status codes.

use crate::auth::{BasicAuth, Identity, MaybeIdentity};
use crate::error::ApiError;
use actix_multipart::{Multipart, MultipartError};
use actix_web::{web, HttpResponse};
use futures_util::TryStreamExt;
use pk_core::error::AppError;
use pk_core::models::{ImageUpload, Target};
use pk_core::service::BoardService;
use serde::Deserialize;

/// Multipart field that carries the uploaded image.
const IMAGE_FIELD: &str = "image";

/// State shared across all Actix-web workers.
pub struct AppState {
    pub service: BoardService,
    pub max_upload_bytes: usize,
}

type HandlerResult = Result<HttpResponse, ApiError>;

/// Route-level choice between `/posts/{id}/...` and `/conversations/{id}/...`.
pub trait TargetKind: 'static {
    fn target(id: i64) -> Target;
}

pub struct OnPost;
pub struct OnConversation;

impl TargetKind for OnPost {
    fn target(id: i64) -> Target {
        Target::Post(id)
    }
}

impl TargetKind for OnConversation {
    fn target(id: i64) -> Target {
        Target::Conversation(id)
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    #[serde(default, alias = "gcm_id")]
    pub device_token: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct VoteRequest {
    #[serde(alias = "user_score")]
    pub value: i64,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub first: u32,
}

// ── Users ───────────────────────────────────────────────────────────────────

/// PUT /users/{username}
pub async fn register_user(
    data: web::Data<AppState>,
    path: web::Path<String>,
    BasicAuth(credentials): BasicAuth,
    body: web::Json<RegisterRequest>,
) -> HandlerResult {
    let username = path.into_inner();
    data.service
        .register(credentials.as_ref(), &username, body.into_inner().device_token)
        .await?;
    Ok(HttpResponse::Created().finish())
}

/// DELETE /users/{username}
pub async fn deregister_user(
    data: web::Data<AppState>,
    path: web::Path<String>,
    Identity(caller): Identity,
) -> HandlerResult {
    data.service.deregister(&caller, &path.into_inner()).await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /users/{username}
pub async fn get_profile(
    data: web::Data<AppState>,
    path: web::Path<String>,
    Identity(caller): Identity,
) -> HandlerResult {
    let profile = data.service.profile(&caller, &path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(profile))
}

// ── Posting ─────────────────────────────────────────────────────────────────

/// POST /conversations
pub async fn create_conversation(
    data: web::Data<AppState>,
    Identity(caller): Identity,
    payload: Multipart,
) -> HandlerResult {
    let upload = read_image(payload, data.max_upload_bytes).await?;
    let created = data.service.create_post(&caller, None, upload).await?;
    Ok(HttpResponse::Created().json(created))
}

/// POST /conversations/{id}
pub async fn add_post(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    Identity(caller): Identity,
    payload: Multipart,
) -> HandlerResult {
    let upload = read_image(payload, data.max_upload_bytes).await?;
    let created = data
        .service
        .create_post(&caller, Some(path.into_inner()), upload)
        .await?;
    Ok(HttpResponse::Created().json(created))
}

fn bad_multipart(err: MultipartError) -> ApiError {
    AppError::ValidationError(format!("malformed multipart body: {err}")).into()
}

/// Pulls the `image` field out of a multipart body, enforcing the size cap
/// while streaming. Other fields are drained and ignored.
async fn read_image(mut payload: Multipart, max_bytes: usize) -> Result<ImageUpload, ApiError> {
    let mut upload = None;

    while let Some(mut field) = payload.try_next().await.map_err(bad_multipart)? {
        if field.name() != Some(IMAGE_FIELD) {
            while field.try_next().await.map_err(bad_multipart)?.is_some() {}
            continue;
        }

        let file_name = field
            .content_disposition()
            .and_then(|cd| cd.get_filename())
            .map(str::to_owned);
        let mut data = Vec::new();
        while let Some(chunk) = field.try_next().await.map_err(bad_multipart)? {
            if data.len() + chunk.len() > max_bytes {
                return Err(AppError::ValidationError(format!(
                    "image exceeds the {max_bytes} byte limit"
                ))
                .into());
            }
            data.extend_from_slice(&chunk);
        }
        upload = Some(ImageUpload { data, file_name });
    }

    upload.ok_or_else(|| {
        AppError::ValidationError(format!("multipart field `{IMAGE_FIELD}` is required")).into()
    })
}

// ── Listing ─────────────────────────────────────────────────────────────────

/// GET /conversations?first=N
pub async fn list_conversations(
    data: web::Data<AppState>,
    MaybeIdentity(viewer): MaybeIdentity,
    query: web::Query<PageQuery>,
) -> HandlerResult {
    let page = data
        .service
        .list_conversations(viewer.as_ref(), i64::from(query.first))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

/// GET /conversations/{id}?first=N
pub async fn list_posts(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    MaybeIdentity(viewer): MaybeIdentity,
    query: web::Query<PageQuery>,
) -> HandlerResult {
    let page = data
        .service
        .list_posts(viewer.as_ref(), path.into_inner(), i64::from(query.first))
        .await?;
    Ok(HttpResponse::Ok().json(page))
}

// ── Votes ───────────────────────────────────────────────────────────────────

/// PUT /{posts|conversations}/{id}/user_score
pub async fn put_vote<K: TargetKind>(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    Identity(caller): Identity,
    body: web::Json<VoteRequest>,
) -> HandlerResult {
    let update = data
        .service
        .set_vote(&caller, K::target(path.into_inner()), body.value)
        .await?;
    Ok(HttpResponse::Created().json(update))
}

/// DELETE /{posts|conversations}/{id}/user_score
pub async fn delete_vote<K: TargetKind>(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    Identity(caller): Identity,
) -> HandlerResult {
    data.service
        .clear_vote(&caller, K::target(path.into_inner()))
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// GET /{posts|conversations}/{id}/user_score
pub async fn get_vote<K: TargetKind>(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    Identity(caller): Identity,
) -> HandlerResult {
    let current = data
        .service
        .user_score(&caller, K::target(path.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(current))
}

// ── Flags ───────────────────────────────────────────────────────────────────

/// PUT /{posts|conversations}/{id}/flag
pub async fn put_flag<K: TargetKind>(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    Identity(caller): Identity,
) -> HandlerResult {
    let update = data
        .service
        .set_flag(&caller, K::target(path.into_inner()))
        .await?;
    Ok(HttpResponse::Created().json(update))
}

/// DELETE /{posts|conversations}/{id}/flag (moderators)
pub async fn clear_flags<K: TargetKind>(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    Identity(caller): Identity,
) -> HandlerResult {
    data.service
        .clear_flags(&caller, K::target(path.into_inner()))
        .await?;
    Ok(HttpResponse::Created().finish())
}

/// GET /{posts|conversations}/{id}/flag (moderators)
pub async fn list_flags<K: TargetKind>(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    Identity(caller): Identity,
) -> HandlerResult {
    let flags = data
        .service
        .list_flags(&caller, K::target(path.into_inner()))
        .await?;
    Ok(HttpResponse::Ok().json(flags))
}

// ── Moderation ──────────────────────────────────────────────────────────────

/// PUT /{posts|conversations}/{id}/block
pub async fn block<K: TargetKind>(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    Identity(caller): Identity,
) -> HandlerResult {
    data.service
        .set_blocked(&caller, K::target(path.into_inner()), true)
        .await?;
    Ok(HttpResponse::NoContent().finish())
}

/// DELETE /{posts|conversations}/{id}/block
pub async fn unblock<K: TargetKind>(
    data: web::Data<AppState>,
    path: web::Path<i64>,
    Identity(caller): Identity,
) -> HandlerResult {
    data.service
        .set_blocked(&caller, K::target(path.into_inner()), false)
        .await?;
    Ok(HttpResponse::Created().finish())
}

// ── Images ──────────────────────────────────────────────────────────────────

/// GET /images/{media_id}
pub async fn get_image(data: web::Data<AppState>, path: web::Path<String>) -> HandlerResult {
    let media_id = path.into_inner();
    let bytes = data.service.load_image(&media_id).await?;
    let mime = mime_guess::from_path(&media_id).first_or_octet_stream();
    Ok(HttpResponse::Ok().content_type(mime.essence_str()).body(bytes))
}
