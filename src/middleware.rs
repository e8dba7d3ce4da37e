use std::future::{ready, Ready};

use actix_web::{dev::Payload, http::header, web::Data, FromRequest, HttpRequest};

use crate::{errors::AppError, AppState};

/// Caller identity resolved from `Authorization: Bearer <access token>`.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub email: String,
}

impl FromRequest for AuthenticatedUser {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<AuthenticatedUser, AppError> {
    let Some(state) = req.app_data::<Data<AppState>>() else {
        log::error!("AppState missing from application data");
        return Err(AppError::internal("Internal server error"));
    };

    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .ok_or_else(|| AppError::unauthorized("Authorization header required"))?;

    let token = header
        .to_str()
        .ok()
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::unauthorized("Invalid authorization header format"))?;

    let email = state
        .auth
        .validate_access_token(token.trim())
        .map_err(|_| AppError::unauthorized("Invalid token"))?;

    Ok(AuthenticatedUser { email })
}
