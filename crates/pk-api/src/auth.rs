//! # Basic-auth extractors
//!
//! `BasicAuth` only parses the `Authorization` header. `Identity` and
//! `MaybeIdentity` also verify the credentials against the user store.

use crate::error::ApiError;
use crate::handlers::AppState;
use actix_web::dev::Payload;
use actix_web::http::header;
use actix_web::{web, FromRequest, HttpRequest};
use base64::Engine;
use futures_util::future::{ready, LocalBoxFuture, Ready};
use pk_core::error::AppError;
use pk_core::models::{Caller, Credentials};

/// Parses `Authorization: Basic <base64(user:password)>`.
/// `Ok(None)` when the header is absent; an error when it is present but malformed.
pub fn parse_basic(req: &HttpRequest) -> Result<Option<Credentials>, AppError> {
    let Some(value) = req.headers().get(header::AUTHORIZATION) else {
        return Ok(None);
    };
    let malformed = || AppError::Unauthorized("malformed basic credentials".to_string());

    let value = value.to_str().map_err(|_| malformed())?;
    let (scheme, encoded) = value.trim().split_once(' ').ok_or_else(malformed)?;
    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AppError::Unauthorized(format!("unsupported auth scheme {scheme}")));
    }

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (username, password) = decoded.split_once(':').ok_or_else(malformed)?;

    Ok(Some(Credentials {
        username: username.to_string(),
        password: password.to_string(),
    }))
}

fn app_state(req: &HttpRequest) -> Result<web::Data<AppState>, AppError> {
    req.app_data::<web::Data<AppState>>()
        .cloned()
        .ok_or_else(|| AppError::Internal("application state is not configured".to_string()))
}

/// Unverified credentials, as needed by registration.
pub struct BasicAuth(pub Option<Credentials>);

impl FromRequest for BasicAuth {
    type Error = ApiError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(parse_basic(req).map(BasicAuth).map_err(ApiError::from))
    }
}

/// A verified caller. Rejects the request with 401 otherwise.
pub struct Identity(pub Caller);

impl FromRequest for Identity {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let state = app_state(&req)?;
            let credentials = parse_basic(&req)?
                .ok_or_else(|| AppError::Unauthorized("credentials required".to_string()))?;
            Ok(Identity(state.service.authenticate(&credentials).await?))
        })
    }
}

/// A verified caller, or anonymous when no credentials were sent.
/// Credentials that are sent but wrong still yield 401.
pub struct MaybeIdentity(pub Option<Caller>);

impl FromRequest for MaybeIdentity {
    type Error = ApiError;
    type Future = LocalBoxFuture<'static, Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let req = req.clone();
        Box::pin(async move {
            let Some(credentials) = parse_basic(&req)? else {
                return Ok(MaybeIdentity(None));
            };
            let state = app_state(&req)?;
            Ok(MaybeIdentity(Some(state.service.authenticate(&credentials).await?)))
        })
    }
}
