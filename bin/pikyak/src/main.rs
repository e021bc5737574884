//! # Pikyak Binary
//!
//! The entry point that assembles the application based on compile-time features.
//!
//! Usage:
//!   pikyak                      serve the API
//!   pikyak promote <username>   grant moderator rights
//!   pikyak demote <username>    revoke moderator rights

mod config;

use actix_web::{web, App, HttpServer};
use anyhow::{bail, Context};
use pk_api::handlers::AppState;
use pk_api::middleware::{cors_policy, security_headers, standard_middleware};
use pk_core::BoardService;

use crate::config::Settings;

// Feature-gated imports: This is the "Compiled-to-Order" magic
#[cfg(feature = "db-sqlite")]
use pk_db_sqlite::SqliteBoardRepo;

#[cfg(feature = "storage-local")]
use pk_storage_local::LocalMediaStore;

#[cfg(feature = "auth-simple")]
use pk_auth_simple::SimpleAuthProvider;

enum Command {
    Serve,
    SetModerator { username: String, is_moderator: bool },
}

fn parse_args(mut args: impl Iterator<Item = String>) -> anyhow::Result<Command> {
    let Some(verb) = args.next() else {
        return Ok(Command::Serve);
    };
    let is_moderator = match verb.as_str() {
        "serve" => return Ok(Command::Serve),
        "promote" => true,
        "demote" => false,
        other => bail!("unknown command {other:?} (expected serve, promote or demote)"),
    };
    let Some(username) = args.next() else {
        bail!("usage: pikyak {verb} <username>");
    };
    Ok(Command::SetModerator { username, is_moderator })
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let command = parse_args(std::env::args().skip(1))?;
    let settings = Settings::load()?;

    // 1. Initialize Database Implementation
    #[cfg(feature = "db-sqlite")]
    let repo = SqliteBoardRepo::connect(&settings.database_url, settings.db_max_connections)
        .await
        .with_context(|| format!("opening database {}", settings.database_url))?;

    // 2. Initialize Storage Implementation
    #[cfg(feature = "storage-local")]
    let store = LocalMediaStore::new(
        settings.media_root.clone(),
        settings.media_url_prefix.clone(),
    );

    // 3. Initialize Auth Implementation
    #[cfg(feature = "auth-simple")]
    let auth = SimpleAuthProvider::new();

    // 4. Wrap in the service (Using dynamic dispatch for maximum flexibility)
    let service = BoardService::new(Box::new(repo), Box::new(store), Box::new(auth));

    if let Command::SetModerator { username, is_moderator } = command {
        service.set_moderator(&username, is_moderator).await?;
        return Ok(());
    }

    let state = web::Data::new(AppState {
        service,
        max_upload_bytes: settings.max_upload_bytes,
    });

    let media_url_prefix = settings.media_url_prefix.clone();

    log::info!("Pikyak starting on http://{}:{}", settings.host, settings.port);

    HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(security_headers())
            .wrap(cors_policy())
            .wrap(standard_middleware())
            .configure(|cfg| pk_api::configure_routes(cfg, &media_url_prefix))
    })
    .bind((settings.host.as_str(), settings.port))
    .with_context(|| format!("binding {}:{}", settings.host, settings.port))?
    .run()
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> impl Iterator<Item = String> {
        list.iter().map(|s| s.to_string()).collect::<Vec<_>>().into_iter()
    }

    #[test]
    fn no_arguments_serves() {
        assert!(matches!(parse_args(args(&[])).unwrap(), Command::Serve));
        assert!(matches!(parse_args(args(&["serve"])).unwrap(), Command::Serve));
    }

    #[test]
    fn promote_and_demote_take_a_username() {
        match parse_args(args(&["promote", "alice"])).unwrap() {
            Command::SetModerator { username, is_moderator } => {
                assert_eq!(username, "alice");
                assert!(is_moderator);
            }
            Command::Serve => panic!("expected promote"),
        }
        assert!(matches!(
            parse_args(args(&["demote", "bob"])).unwrap(),
            Command::SetModerator { is_moderator: false, .. }
        ));
        assert!(parse_args(args(&["promote"])).is_err());
        assert!(parse_args(args(&["frobnicate"])).is_err());
    }
}
