//! User seeding endpoint.
//!
//! The user store is a read-only collaborator of the fulfillment core; this
//! endpoint only exists so a standalone server can be exercised end to end.

use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use domain::UserId;
use serde::{Deserialize, Serialize};
use storage::Store;

use crate::error::ApiError;
use crate::routes::orders::{AppState, parse_uuid};

#[derive(Deserialize, Default)]
pub struct RegisterUserRequest {
    pub user_id: Option<String>,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub user_id: String,
}

/// POST /users — register a user, generating an ID if none is given.
#[tracing::instrument(skip(state, req))]
pub async fn register<S: Store + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<RegisterUserRequest>,
) -> Result<(StatusCode, Json<UserResponse>), ApiError> {
    let user_id = match req.user_id {
        Some(id) => UserId::from_uuid(parse_uuid(&id)?),
        None => UserId::new(),
    };

    state.service.users().register(user_id).await;
    tracing::info!(%user_id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(UserResponse {
            user_id: user_id.to_string(),
        }),
    ))
}
