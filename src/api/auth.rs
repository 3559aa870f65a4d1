/// /auth/* endpoints
use crate::{
    auth::{
        AuthContext, AuthResponse, LoginRequest, LogoutRequest, RefreshRequest, RegisterRequest,
        UserAuthoritiesResponse,
    },
    context::AppContext,
    error::{OpsError, OpsResult},
};
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use validator::Validate;

/// Build auth routes
pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/refresh", post(refresh))
        .route("/auth/logout", post(logout))
        .route("/auth/user-authorities", get(user_authorities))
}

/// Register endpoint
async fn register(
    State(ctx): State<AppContext>,
    Json(req): Json<RegisterRequest>,
) -> OpsResult<(StatusCode, Json<AuthResponse>)> {
    req.validate()
        .map_err(|e| OpsError::Validation(e.to_string()))?;

    let response = ctx.auth_service.register(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// Login endpoint
async fn login(
    State(ctx): State<AppContext>,
    Json(req): Json<LoginRequest>,
) -> OpsResult<Json<AuthResponse>> {
    req.validate()
        .map_err(|e| OpsError::Validation(e.to_string()))?;

    let response = ctx.auth_service.login(req).await?;
    Ok(Json(response))
}

/// Refresh endpoint
async fn refresh(
    State(ctx): State<AppContext>,
    Json(req): Json<RefreshRequest>,
) -> OpsResult<Json<AuthResponse>> {
    let response = ctx.auth_service.refresh(req).await?;
    Ok(Json(response))
}

/// Logout endpoint. Always 204; deleting an absent token is not an error.
async fn logout(
    State(ctx): State<AppContext>,
    Json(req): Json<LogoutRequest>,
) -> OpsResult<StatusCode> {
    ctx.auth_service.logout(&req.refresh_token).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Authorities of the bearer-authenticated caller
async fn user_authorities(
    State(ctx): State<AppContext>,
    auth: AuthContext,
) -> OpsResult<Json<UserAuthoritiesResponse>> {
    let response = ctx.auth_service.user_authorities(&auth.account).await?;
    Ok(Json(response))
}
