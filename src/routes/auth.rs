use axum::{extract::State, Json};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{Tenant, User},
    schema::{tenants, users},
    state::AppState,
    workflow::Role,
};

#[derive(Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
}

#[derive(Serialize)]
pub struct MeResponse {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub tenant_name: String,
    pub username: String,
    pub role: String,
    pub is_admin: bool,
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    let username = payload.username.trim();
    let mut conn = state.db()?;

    let Some(user) = users::table
        .filter(users::username.eq(username))
        .first::<User>(&mut conn)
        .optional()?
    else {
        warn!(%username, "login for unknown user");
        return Err(AppError::unauthorized());
    };

    let valid = password::verify_password(&payload.password, &user.password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        warn!(user_id = %user.id, "login rejected");
        return Err(AppError::unauthorized());
    }

    let access_token = state
        .jwt
        .generate_token(user.id, user.tenant_id, &user.username, &user.role)?;

    info!(user_id = %user.id, tenant_id = %user.tenant_id, "user logged in");
    Ok(Json(LoginResponse {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: state.config.jwt_expiry_minutes * 60,
    }))
}

pub async fn me(
    State(state): State<AppState>,
    user: AuthenticatedUser,
) -> AppResult<Json<MeResponse>> {
    let mut conn = state.db()?;
    let tenant: Tenant = tenants::table
        .find(user.tenant_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    Ok(Json(MeResponse {
        is_admin: Role::parse(&user.role) == Role::Admin,
        user_id: user.user_id,
        tenant_id: tenant.id,
        tenant_name: tenant.name,
        username: user.username,
        role: user.role,
    }))
}
