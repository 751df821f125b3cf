//! Registration, login and the per-request [`CurrentUser`].

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};
use std::sync::Arc;

use crate::errors::AppError;
use crate::password::verify_password;
use crate::state::AppState;
use crate::user_models::User;

/// The logged-in user for one request, resolved from `Authorization: Bearer`.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub user: User,
    pub token: String,
}

#[async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<AppState>) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .map(|t| t.trim().to_string())
            .ok_or(AppError::Unauthorized)?;

        let user_id = state
            .sessions
            .user_id(&token)
            .await
            .ok_or(AppError::Unauthorized)?;
        let user = state
            .storage
            .get_user(&user_id)
            .await?
            .ok_or(AppError::Unauthorized)?;

        Ok(CurrentUser { user, token })
    }
}

pub async fn register(state: &AppState, username: &str, password: &str) -> Result<User, AppError> {
    let username = username.trim();
    if username.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest(
            "Username and password cannot be empty".to_string(),
        ));
    }
    if username.contains(['/', '\\']) || username.starts_with('.') {
        return Err(AppError::BadRequest(format!("Invalid username '{}'", username)));
    }
    // Upload folders sit beside the store file in backups.
    let store_name = state.config.store_path.file_name().and_then(|n| n.to_str());
    if store_name == Some(username) {
        return Err(AppError::BadRequest(format!("Username '{}' is reserved", username)));
    }

    let password_hash = state.hasher.hash(password)?;
    state
        .storage
        .create_user(User::new(username.to_string(), password_hash))
        .await?
        .ok_or_else(|| AppError::Conflict("Username already exists".to_string()))
}

/// Returns `None` for an unknown user or a wrong password.
pub async fn authenticate(state: &AppState, username: &str, password: &str) -> Result<Option<User>, AppError> {
    let Some(user) = state.storage.get_user_by_username(username.trim()).await? else {
        return Ok(None);
    };

    if verify_password(password, &user.password_hash)? {
        Ok(Some(user))
    } else {
        Ok(None)
    }
}
