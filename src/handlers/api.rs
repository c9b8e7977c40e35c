//! Credential endpoints: registration and login, both answering with a
//! bearer token usable on the upgrade request

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use uuid::Uuid;
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::context::AppContext;
use crate::error::{Result, RustyRoomsError};
use crate::handlers::with_context;

const MAX_BODY_BYTES: u64 = 4 * 1024;
const LOGIN_FAILED: &str = "Login failed";

#[derive(Debug, Clone, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RegistrationRequest {
    pub name: String,
    pub username: String,
    pub password: String,
    pub confirmation: String,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// `POST /api/login` and `POST /api/registration`
pub fn api_routes(
    ctx: AppContext,
) -> impl Filter<Extract = (Box<dyn Reply>,), Error = Rejection> + Clone {
    let login = warp::path!("api" / "login")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_context(ctx.clone()))
        .and_then(handle_login);

    let registration = warp::path!("api" / "registration")
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json())
        .and(with_context(ctx))
        .and_then(handle_registration);

    login.or(registration).unify()
}

fn error_response(message: &str) -> Box<dyn Reply> {
    Box::new(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error: message }),
        StatusCode::FORBIDDEN,
    ))
}

fn token_response(token: String) -> Box<dyn Reply> {
    Box::new(warp::reply::with_status(token, StatusCode::OK))
}

async fn handle_login(
    request: LoginRequest,
    ctx: AppContext,
) -> std::result::Result<Box<dyn Reply>, Infallible> {
    match login(request, &ctx).await {
        Ok(token) => Ok(token_response(token)),
        Err(e) => {
            warn!("Login rejected: {}", e);
            Ok(error_response(LOGIN_FAILED))
        }
    }
}

async fn login(request: LoginRequest, ctx: &AppContext) -> Result<String> {
    let user = ctx
        .users
        .find_user_by_username(&request.username)
        .await?
        .ok_or(RustyRoomsError::Unauthorized)?;

    let hash = user.password_hash.clone().ok_or(RustyRoomsError::Unauthorized)?;

    let auth = ctx.auth.clone();
    let password = request.password;
    let matches = tokio::task::spawn_blocking(move || auth.compare_password(&password, &hash))
        .await
        .map_err(|e| RustyRoomsError::AuthError(e.to_string()))??;

    if !matches {
        return Err(RustyRoomsError::Unauthorized);
    }

    info!("User {} logged in", user.id);
    ctx.auth.create_token(&user)
}

async fn handle_registration(
    request: RegistrationRequest,
    ctx: AppContext,
) -> std::result::Result<Box<dyn Reply>, Infallible> {
    match register(request, &ctx).await {
        Ok(token) => Ok(token_response(token)),
        Err(RustyRoomsError::ValidationError(msg)) => Ok(error_response(&msg)),
        Err(e) => {
            error!("Registration failed: {}", e);
            Ok(error_response("Registration failed"))
        }
    }
}

async fn register(request: RegistrationRequest, ctx: &AppContext) -> Result<String> {
    let name = request.name.trim().to_string();
    let username = request.username.trim().to_string();

    if name.is_empty() || username.is_empty() || request.password.is_empty() {
        return Err(RustyRoomsError::ValidationError(
            "Name, username and password are required".to_string(),
        ));
    }
    if request.password != request.confirmation {
        return Err(RustyRoomsError::ValidationError(
            "Password and confirmation do not match".to_string(),
        ));
    }
    if ctx.users.find_user_by_username(&username).await?.is_some() {
        return Err(RustyRoomsError::ValidationError(
            "User already exists".to_string(),
        ));
    }

    let auth = ctx.auth.clone();
    let password = request.password;
    let hash = tokio::task::spawn_blocking(move || auth.generate_password(&password))
        .await
        .map_err(|e| RustyRoomsError::AuthError(e.to_string()))??;

    let user = ctx
        .users
        .add_db_user(Uuid::new_v4().to_string(), name, username, hash)
        .await
        .map_err(|e| match e {
            RustyRoomsError::StorageError(_) => {
                RustyRoomsError::ValidationError("User already exists".to_string())
            }
            other => other,
        })?;

    info!("Registered user {} ({})", user.name, user.id);
    ctx.auth.create_token(&user)
}
