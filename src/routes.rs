use actix_web::{
    delete, get, patch, post, put,
    web::{self, Data},
    HttpResponse, Responder, Scope,
};
use serde::Deserialize;
use serde_json::json;

use crate::{
    db,
    errors::{AllocError, AppError, AuthError, StoreError},
    items::{self, ItemChanges, ItemError},
    middleware::AuthenticatedUser,
    structs::User,
    utils::{normalize_email, valid_email},
    AppState,
};

const MIN_PASSWORD_LEN: usize = 6;
const MAX_ITEM_NAME_LEN: usize = 200;
const MAX_ITEM_DESCRIPTION_LEN: usize = 1000;
const MAX_TAG_NAME_LEN: usize = 20;

pub fn api_scope() -> Scope {
    web::scope("/api")
        .service(register_handler)
        .service(user_statistics_handler)
        .service(login_handler)
        .service(refresh_handler)
        .service(verify_token_handler)
        .service(request_password_reset_handler)
        .service(set_new_password_handler)
        .service(deactivate_user_handler)
        .service(get_user_handler)
        .service(update_user_handler)
        .service(delete_user_handler)
        .service(list_organizations_handler)
        .service(set_active_organization_handler)
        .service(list_items_handler)
        .service(get_item_handler)
        .service(create_item_handler)
        .service(update_item_handler)
        .service(delete_item_handler)
        .service(list_tags_handler)
        .service(create_tag_handler)
        .service(delete_tag_handler)
        .service(items_by_tag_handler)
}

#[derive(Deserialize)]
pub struct Register {
    email: String,
    password: String,
}

#[post("/users")]
pub async fn register_handler(
    web::Json(form): web::Json<Register>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let email = normalize_email(&form.email);
    if !valid_email(&email) {
        return Err(AppError::bad_request("Invalid input: invalid email address"));
    }
    if form.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::bad_request(format!(
            "Invalid input: password must be at least {} characters long",
            MIN_PASSWORD_LEN
        )));
    }

    match state.auth.register(&email, &form.password).await {
        Ok(_) => Ok(HttpResponse::Created().json(json!({ "message": "User created successfully" }))),
        Err(AuthError::AlreadyExists) => Err(AppError::conflict("User already exists")),
        Err(e) => {
            log::error!("Failed to create user {}: {}", email, e);
            Err(AppError::internal("Failed to create user"))
        }
    }
}

#[get("/users")]
pub async fn user_statistics_handler(state: Data<AppState>) -> Result<impl Responder, AppError> {
    let total = db::count_users(&state.db_pool).await.map_err(|e| {
        log::error!("Failed to count users: {}", e);
        AppError::internal("Failed to get user statistics")
    })?;
    Ok(HttpResponse::Ok().json(json!({ "total": total })))
}

#[derive(Deserialize)]
pub struct Login {
    email: String,
    password: String,
}

#[post("/token")]
pub async fn login_handler(
    web::Json(form): web::Json<Login>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let email = normalize_email(&form.email);
    if !valid_email(&email) {
        return Err(AppError::bad_request("Invalid input: invalid email address"));
    }
    if form.password.is_empty() {
        return Err(AppError::bad_request("Invalid input: password is required"));
    }

    match state.auth.validate_credentials(&email, &form.password).await {
        Ok(()) => {}
        Err(AuthError::InvalidCredentials) => {
            log::info!("Failed login for {}", email);
            return Err(AppError::unauthorized("Invalid credentials"));
        }
        Err(e) => {
            log::error!("Login failed for {}: {}", email, e);
            return Err(AppError::internal("Login failed"));
        }
    }

    let tokens = state.auth.issue_token_pair(&email).map_err(|e| {
        log::error!("Token generation failed for {}: {}", email, e);
        AppError::internal("Failed to generate tokens")
    })?;
    log::info!("Login successful for {}", email);
    Ok(HttpResponse::Ok().json(tokens))
}

#[derive(Deserialize)]
pub struct Refresh {
    refresh_token: String,
}

#[post("/refresh")]
pub async fn refresh_handler(
    web::Json(form): web::Json<Refresh>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if form.refresh_token.is_empty() {
        return Err(AppError::bad_request("Invalid input: refresh_token is required"));
    }

    match state.auth.refresh(&form.refresh_token).await {
        Ok(tokens) => Ok(HttpResponse::Ok().json(tokens)),
        Err(AuthError::InvalidToken) => Err(AppError::unauthorized("Invalid refresh token")),
        Err(AuthError::UserGone) => Err(AppError::unauthorized("User not found")),
        Err(AuthError::Signing(e)) => {
            log::error!("Failed to generate new tokens: {}", e);
            Err(AppError::internal("Failed to generate tokens"))
        }
        Err(e) => {
            log::error!("Failed to validate user during refresh: {}", e);
            Err(AppError::internal("Failed to validate user"))
        }
    }
}

#[derive(Deserialize)]
pub struct Verify {
    token: String,
}

#[post("/token/verify")]
pub async fn verify_token_handler(
    web::Json(form): web::Json<Verify>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if form.token.is_empty() {
        return Err(AppError::bad_request("Invalid input: token is required"));
    }
    let email = state
        .auth
        .validate_access_token(&form.token)
        .map_err(|_| AppError::unauthorized("Invalid token"))?;
    Ok(HttpResponse::Ok().json(json!({ "valid": true, "email": email })))
}

#[derive(Deserialize)]
pub struct PasswordResetRequest {
    username: String,
}

#[post("/users/reset-password")]
pub async fn request_password_reset_handler(
    web::Json(form): web::Json<PasswordResetRequest>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let email = normalize_email(&form.username);
    if email.is_empty() {
        return Err(AppError::bad_request("Invalid input: username is required"));
    }

    match db::create_reset_token(&state.db_pool, &email, state.reset_token_ttl).await {
        Ok(_) => Ok(HttpResponse::Ok().json(json!({ "message": "Password reset token sent" }))),
        Err(StoreError::NotFound) => Err(AppError::not_found("User not found")),
        Err(e) => {
            log::error!("Failed to create reset token for {}: {}", email, e);
            Err(AppError::internal("Failed to process request"))
        }
    }
}

#[derive(Deserialize)]
pub struct NewPassword {
    password: String,
    token: String,
}

#[post("/users/send-password")]
pub async fn set_new_password_handler(
    web::Json(form): web::Json<NewPassword>,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    if form.password.is_empty() || form.token.is_empty() {
        return Err(AppError::bad_request("Invalid input: password and token are required"));
    }

    match db::reset_password(&state.db_pool, &form.token, &form.password).await {
        Ok(_) => Ok(HttpResponse::Ok().json(json!({ "message": "Password updated successfully" }))),
        Err(StoreError::NotFound) => Err(AppError::bad_request("Invalid or expired token")),
        Err(e) => {
            log::error!("Failed to reset password: {}", e);
            Err(AppError::internal("Failed to update password"))
        }
    }
}

#[post("/users/deactivate")]
pub async fn deactivate_user_handler(user: AuthenticatedUser) -> impl Responder {
    // there is no deactivated flag yet; the call only acknowledges
    log::info!("Deactivation requested by {}", user.email);
    HttpResponse::Ok().json(json!({ "message": "User deactivated successfully" }))
}

fn ensure_self(user: &AuthenticatedUser, email: &str) -> Result<(), AppError> {
    if user.email != normalize_email(email) {
        return Err(AppError::forbidden("Access denied"));
    }
    Ok(())
}

#[get("/users/{email}")]
pub async fn get_user_handler(
    path: web::Path<String>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    ensure_self(&user, &path)?;
    let record = match db::get_user(&state.db_pool, &user.email).await {
        Ok(record) => record,
        Err(StoreError::NotFound) => return Err(AppError::not_found("User not found")),
        Err(e) => {
            log::error!("Failed to get user {}: {}", user.email, e);
            return Err(AppError::internal("Failed to get user"));
        }
    };
    Ok(HttpResponse::Ok().json(json!({
        "email": record.email,
        "prefix": record.prefix,
        "active_organization_id": record.active_organization_id,
    })))
}

#[derive(Deserialize)]
pub struct UserUpdate {
    email: String,
}

#[put("/users/{email}")]
pub async fn update_user_handler(
    path: web::Path<String>,
    web::Json(form): web::Json<UserUpdate>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    ensure_self(&user, &path)?;
    let new_email = normalize_email(&form.email);
    if !valid_email(&new_email) {
        return Err(AppError::bad_request("Invalid input: invalid email address"));
    }

    match db::update_user_email(&state.db_pool, &user.email, &new_email).await {
        Ok(updated) => Ok(HttpResponse::Ok().json(json!({ "email": updated.email }))),
        Err(StoreError::NotFound) => Err(AppError::not_found("User not found")),
        Err(StoreError::Duplicate) => Err(AppError::conflict("Email already in use")),
        Err(e) => {
            log::error!("Failed to update user {}: {}", user.email, e);
            Err(AppError::internal("Failed to update user"))
        }
    }
}

#[delete("/users/{email}")]
pub async fn delete_user_handler(
    path: web::Path<String>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    ensure_self(&user, &path)?;
    match db::delete_user(&state.db_pool, &user.email).await {
        Ok(()) => Ok(HttpResponse::NoContent().finish()),
        Err(StoreError::NotFound) => Err(AppError::not_found("User not found")),
        Err(e) => {
            log::error!("Failed to delete user {}: {}", user.email, e);
            Err(AppError::internal("Failed to delete user"))
        }
    }
}

#[get("/organizations")]
pub async fn list_organizations_handler(
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let organizations = db::organizations_for_user(&state.db_pool, &user.email)
        .await
        .map_err(|e| {
            log::error!("Failed to get organizations for {}: {}", user.email, e);
            AppError::internal("Failed to get organizations")
        })?;
    Ok(HttpResponse::Ok().json(organizations))
}

#[derive(Deserialize)]
pub struct ActiveOrganization {
    organization_id: i64,
}

#[put("/organizations/active")]
pub async fn set_active_organization_handler(
    web::Json(form): web::Json<ActiveOrganization>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    match db::set_active_organization(&state.db_pool, &user.email, form.organization_id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(json!({
            "active_organization_id": form.organization_id
        }))),
        Err(StoreError::NotFound) => Err(AppError::not_found("Organization not found")),
        Err(e) => {
            log::error!("Failed to switch organization for {}: {}", user.email, e);
            Err(AppError::internal("Failed to update organization"))
        }
    }
}

fn item_error(e: ItemError, action: &str) -> AppError {
    match e {
        ItemError::NotFound => AppError::not_found("Item not found"),
        ItemError::InvalidParent => AppError::bad_request("Invalid parent item"),
        ItemError::Alloc(AllocError::UserNotFound) => AppError::unauthorized("User not found"),
        other => {
            log::error!("Failed to {} item: {}", action, other);
            AppError::internal(format!("Failed to {} item", action))
        }
    }
}

#[derive(Deserialize)]
pub struct ItemQuery {
    name: Option<String>,
}

#[get("/items")]
pub async fn list_items_handler(
    query: web::Query<ItemQuery>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let items = items::list_items(&state.db_pool, &user.email, query.name.as_deref())
        .await
        .map_err(|e| item_error(e, "get"))?;
    log::debug!("Found {} items for {}", items.len(), user.email);
    Ok(HttpResponse::Ok().json(json!({ "items": items })))
}

#[get("/items/{item_id}")]
pub async fn get_item_handler(
    path: web::Path<i64>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let item = items::get_item(&state.db_pool, path.into_inner(), &user.email)
        .await
        .map_err(|e| item_error(e, "get"))?;
    Ok(HttpResponse::Ok().json(item))
}

#[derive(Deserialize)]
pub struct ItemCreate {
    name: String,
    #[serde(default)]
    description: String,
    parent: Option<i64>,
}

fn check_item_fields(name: Option<&str>, description: Option<&str>) -> Result<(), AppError> {
    if name.is_some_and(|n| n.chars().count() > MAX_ITEM_NAME_LEN) {
        return Err(AppError::bad_request("Invalid input: name is too long"));
    }
    if description.is_some_and(|d| d.chars().count() > MAX_ITEM_DESCRIPTION_LEN) {
        return Err(AppError::bad_request("Invalid input: description is too long"));
    }
    Ok(())
}

#[post("/items")]
pub async fn create_item_handler(
    web::Json(form): web::Json<ItemCreate>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Invalid input: name is required"));
    }
    check_item_fields(Some(name), Some(&form.description))?;

    let item = items::create_item(
        &state.db_pool,
        &user.email,
        name,
        &form.description,
        form.parent,
    )
    .await
    .map_err(|e| item_error(e, "create"))?;
    Ok(HttpResponse::Created().json(item))
}

#[derive(Deserialize)]
pub struct ItemUpdate {
    name: Option<String>,
    description: Option<String>,
    parent: Option<i64>,
    tags: Option<Vec<i64>>,
}

#[patch("/items/{item_id}")]
pub async fn update_item_handler(
    path: web::Path<i64>,
    web::Json(form): web::Json<ItemUpdate>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    check_item_fields(form.name.as_deref(), form.description.as_deref())?;
    let changes = ItemChanges {
        name: form.name.map(|n| n.trim().to_string()),
        description: form.description,
        parent_id: form.parent,
        tag_ids: form.tags,
    };
    let item = items::update_item(&state.db_pool, path.into_inner(), &user.email, changes)
        .await
        .map_err(|e| item_error(e, "update"))?;
    Ok(HttpResponse::Ok().json(item))
}

#[delete("/items/{item_id}")]
pub async fn delete_item_handler(
    path: web::Path<i64>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    items::delete_item(&state.db_pool, path.into_inner(), &user.email)
        .await
        .map_err(|e| item_error(e, "delete"))?;
    Ok(HttpResponse::NoContent().finish())
}

async fn active_organization(state: &AppState, email: &str) -> Result<i64, AppError> {
    let user: User = match db::get_user(&state.db_pool, email).await {
        Ok(user) => user,
        Err(StoreError::NotFound) => return Err(AppError::unauthorized("User not found")),
        Err(e) => {
            log::error!("Failed to get user {}: {}", email, e);
            return Err(AppError::internal("Failed to get user"));
        }
    };
    user.active_organization_id
        .ok_or_else(|| AppError::bad_request("No active organization"))
}

#[get("/tags")]
pub async fn list_tags_handler(
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let organization_id = active_organization(&state, &user.email).await?;
    let tags = db::tags_for_organization(&state.db_pool, organization_id)
        .await
        .map_err(|e| {
            log::error!("Failed to get tags for {}: {}", organization_id, e);
            AppError::internal("Failed to get tags")
        })?;
    Ok(HttpResponse::Ok().json(tags))
}

#[derive(Deserialize)]
pub struct TagCreate {
    name: String,
}

#[post("/tags")]
pub async fn create_tag_handler(
    web::Json(form): web::Json<TagCreate>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let name = form.name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("Invalid input: name is required"));
    }
    if name.chars().count() > MAX_TAG_NAME_LEN {
        return Err(AppError::bad_request("Invalid input: name is too long"));
    }

    let organization_id = active_organization(&state, &user.email).await?;
    match db::create_tag(&state.db_pool, name, organization_id).await {
        Ok(tag) => Ok(HttpResponse::Created().json(tag)),
        Err(StoreError::Duplicate) => Err(AppError::conflict("Tag already exists")),
        Err(e) => {
            log::error!("Failed to create tag: {}", e);
            Err(AppError::internal("Failed to create tag"))
        }
    }
}

#[delete("/tags/{tag_id}")]
pub async fn delete_tag_handler(
    path: web::Path<i64>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let organization_id = active_organization(&state, &user.email).await?;
    match db::delete_tag(&state.db_pool, path.into_inner(), organization_id).await {
        Ok(()) => Ok(HttpResponse::NoContent().finish()),
        Err(StoreError::NotFound) => Err(AppError::not_found("Tag not found")),
        Err(e) => {
            log::error!("Failed to delete tag: {}", e);
            Err(AppError::internal("Failed to delete tag"))
        }
    }
}

#[get("/tags/{tag_id}/items")]
pub async fn items_by_tag_handler(
    path: web::Path<i64>,
    user: AuthenticatedUser,
    state: Data<AppState>,
) -> Result<impl Responder, AppError> {
    let items = items::items_by_tag(&state.db_pool, path.into_inner(), &user.email)
        .await
        .map_err(|e| item_error(e, "get"))?;
    Ok(HttpResponse::Ok().json(json!({ "items": items })))
}
