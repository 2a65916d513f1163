use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use service_core::error::AppError;

use crate::{
    dtos::auth::{
        OtpRequest, OtpResponse, RefreshRequest, SigninOtpRequest, SignoutRequest,
        SignoutResponse, TokenPairResponse,
    },
    dtos::ErrorResponse,
    middleware::AuthUser,
    models::LoginIdentifier,
    utils::ValidatedJson,
    AppState,
};

/// Send a one-time code to an email address or phone number
#[utoipa::path(
    post,
    path = "/auth/otp",
    request_body = OtpRequest,
    responses(
        (status = 200, description = "Code sent", body = OtpResponse),
        (status = 400, description = "Malformed destination", body = ErrorResponse),
        (status = 429, description = "A code is still live for this destination", body = ErrorResponse),
        (status = 503, description = "Store unavailable", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<OtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let login = LoginIdentifier::parse(&req.destination, req.channel)
        .map_err(|e| AppError::InvalidFields(vec![e.to_string()]))?;

    state.auth.request_otp(login).await?;

    Ok((
        StatusCode::OK,
        Json(OtpResponse {
            success: true,
            message: "OTP sent".to_string(),
        }),
    ))
}

/// Exchange a one-time code for an access/refresh token pair
#[utoipa::path(
    post,
    path = "/auth/signin/otp",
    request_body = SigninOtpRequest,
    responses(
        (status = 200, description = "Signed in", body = TokenPairResponse),
        (status = 400, description = "Validation error", body = ErrorResponse),
        (status = 401, description = "Code is wrong, expired or already used", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn signin_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SigninOtpRequest>,
) -> Result<Json<TokenPairResponse>, AppError> {
    let tokens = state.auth.sign_in_with_otp(&req.login, &req.otp).await?;
    Ok(Json(tokens.into()))
}

/// Rotate a refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = TokenPairResponse),
        (status = 401, description = "Refresh token invalid, expired or already used", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<Json<TokenPairResponse>, AppError> {
    let tokens = state.auth.refresh(&req.refresh_token).await?;
    Ok(Json(tokens.into()))
}

/// Revoke the current access token and the given refresh token
#[utoipa::path(
    post,
    path = "/auth/signout",
    request_body = SignoutRequest,
    responses(
        (status = 200, description = "Signed out", body = SignoutResponse),
        (status = 401, description = "Missing or invalid access token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn signout(
    State(state): State<AppState>,
    AuthUser(ctx): AuthUser,
    body: Option<Json<SignoutRequest>>,
) -> Result<Json<SignoutResponse>, AppError> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    state
        .auth
        .sign_out(&ctx.claims, req.refresh_token.as_deref())
        .await?;
    Ok(Json(SignoutResponse {}))
}
