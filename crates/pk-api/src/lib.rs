//! # pk-api
//!
//! The web routing and orchestration layer for Pikyak.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod middleware;

use actix_web::{web, HttpRequest};
use error::ApiError;
use handlers::{OnConversation, OnPost};
use pk_core::error::AppError;

fn bad_request(message: String) -> actix_web::Error {
    ApiError(AppError::ValidationError(message)).into()
}

/// Registers every Pikyak route on `cfg`. Stored images are served under
/// `media_url_prefix`, which must match the prefix the media store puts in
/// image URLs.
///
/// Everything hangs off one unprefixed scope; the binary may mount it
/// elsewhere (e.g., /api/v1/) with `web::scope(..).configure(..)`.
pub fn configure_routes(cfg: &mut web::ServiceConfig, media_url_prefix: &str) {
    let image_path = format!("{}/{{media_id}}", media_url_prefix.trim_end_matches('/'));

    cfg.service(
        web::scope("")
            // Body and query parse failures share the JSON error shape.
            .app_data(web::JsonConfig::default().error_handler(|err, _req: &HttpRequest| {
                bad_request(format!("invalid JSON body: {err}"))
            }))
            .app_data(web::QueryConfig::default().error_handler(|err, _req: &HttpRequest| {
                bad_request(format!("invalid query string: {err}"))
            }))
            // Accounts
            .service(
                web::resource("/users/{username}")
                    .route(web::put().to(handlers::register_user))
                    .route(web::delete().to(handlers::deregister_user))
                    .route(web::get().to(handlers::get_profile)),
            )
            // Conversations and posting
            .service(
                web::resource("/conversations")
                    .route(web::get().to(handlers::list_conversations))
                    .route(web::post().to(handlers::create_conversation)),
            )
            .service(
                web::resource("/conversations/{id}")
                    .route(web::get().to(handlers::list_posts))
                    .route(web::post().to(handlers::add_post)),
            )
            // Votes
            .service(
                web::resource("/posts/{id}/user_score")
                    .route(web::put().to(handlers::put_vote::<OnPost>))
                    .route(web::delete().to(handlers::delete_vote::<OnPost>))
                    .route(web::get().to(handlers::get_vote::<OnPost>)),
            )
            .service(
                web::resource("/conversations/{id}/user_score")
                    .route(web::put().to(handlers::put_vote::<OnConversation>))
                    .route(web::delete().to(handlers::delete_vote::<OnConversation>))
                    .route(web::get().to(handlers::get_vote::<OnConversation>)),
            )
            // Flags
            .service(
                web::resource("/posts/{id}/flag")
                    .route(web::put().to(handlers::put_flag::<OnPost>))
                    .route(web::delete().to(handlers::clear_flags::<OnPost>))
                    .route(web::get().to(handlers::list_flags::<OnPost>)),
            )
            .service(
                web::resource("/conversations/{id}/flag")
                    .route(web::put().to(handlers::put_flag::<OnConversation>))
                    .route(web::delete().to(handlers::clear_flags::<OnConversation>))
                    .route(web::get().to(handlers::list_flags::<OnConversation>)),
            )
            // Moderation
            .service(
                web::resource("/posts/{id}/block")
                    .route(web::put().to(handlers::block::<OnPost>))
                    .route(web::delete().to(handlers::unblock::<OnPost>)),
            )
            .service(
                web::resource("/conversations/{id}/block")
                    .route(web::put().to(handlers::block::<OnConversation>))
                    .route(web::delete().to(handlers::unblock::<OnConversation>)),
            )
            // Stored images
            .service(web::resource(image_path).route(web::get().to(handlers::get_image))),
    );
}
