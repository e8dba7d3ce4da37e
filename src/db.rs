use std::time::Duration;

use chrono::Utc;
use sqlx::{Acquire, SqliteConnection, SqlitePool};

use crate::{
    errors::StoreError,
    structs::{Organization, ResetToken, Tag, User},
    utils::random_token,
};

const RESET_TOKEN_LEN: usize = 15;

pub async fn find_user(pool: &SqlitePool, email: &str) -> Result<Option<User>, sqlx::Error> {
    sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await
}

pub async fn get_user(pool: &SqlitePool, email: &str) -> Result<User, StoreError> {
    find_user(pool, email).await?.ok_or(StoreError::NotFound)
}

pub async fn count_users(pool: &SqlitePool) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
        .fetch_one(pool)
        .await
}

/// Creates the user together with an organization it owns and activates.
///
/// The membership row is written under a savepoint; if that write fails the
/// user and organization are still committed.
pub async fn create_user_with_organization(
    pool: &SqlitePool,
    email: &str,
    password: &str,
    prefix: &str,
) -> Result<User, StoreError> {
    let mut tx = pool.begin().await?;

    let organization = create_organization(&mut tx, &format!("{email}_org")).await?;

    let now = Utc::now();
    let user = sqlx::query_as::<_, User>(
        "INSERT INTO users (email, password, prefix, active_organization_id, created_at, updated_at) VALUES ($1, $2, $3, $4, $5, $6) RETURNING *",
    )
    .bind(email)
    .bind(password)
    .bind(prefix)
    .bind(organization.id)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *tx)
    .await?;

    match (&mut tx).begin().await {
        Ok(mut savepoint) => {
            let joined = add_user_to_organization(&mut savepoint, organization.id, email).await;
            match joined {
                Ok(()) => {
                    if let Err(e) = savepoint.commit().await {
                        log::warn!("Could not add {} to organization {}: {}", email, organization.id, e);
                    }
                }
                Err(e) => {
                    log::warn!("Could not add {} to organization {}: {}", email, organization.id, e);
                }
            }
        }
        Err(e) => log::warn!("Could not open savepoint for organization membership: {}", e),
    }

    tx.commit().await?;
    log::info!("User created: {} (organization {})", user.email, organization.id);
    Ok(user)
}

pub async fn update_user_email(
    pool: &SqlitePool,
    email: &str,
    new_email: &str,
) -> Result<User, StoreError> {
    let user = sqlx::query_as::<_, User>(
        "UPDATE users SET email = $1, updated_at = $2 WHERE email = $3 RETURNING *",
    )
    .bind(new_email)
    .bind(Utc::now())
    .bind(email)
    .fetch_one(pool)
    .await?;
    log::info!("User {} renamed to {}", email, new_email);
    Ok(user)
}

pub async fn update_password(
    conn: &mut SqliteConnection,
    email: &str,
    password: &str,
) -> Result<(), StoreError> {
    let result = sqlx::query("UPDATE users SET password = $1, updated_at = $2 WHERE email = $3")
        .bind(password)
        .bind(Utc::now())
        .bind(email)
        .execute(conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub async fn delete_user(pool: &SqlitePool, email: &str) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM users WHERE email = $1")
        .bind(email)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    log::info!("User {} deleted", email);
    Ok(())
}

pub async fn create_organization(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Organization, sqlx::Error> {
    let now = Utc::now();
    sqlx::query_as::<_, Organization>(
        "INSERT INTO organizations (name, created_at, updated_at) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(name)
    .bind(now)
    .bind(now)
    .fetch_one(conn)
    .await
}

pub async fn add_user_to_organization(
    conn: &mut SqliteConnection,
    organization_id: i64,
    email: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO organization_users (organization_id, user_email) VALUES ($1, $2) ON CONFLICT DO NOTHING",
    )
    .bind(organization_id)
    .bind(email)
    .execute(conn)
    .await?;
    Ok(())
}

pub async fn organizations_for_user(
    pool: &SqlitePool,
    email: &str,
) -> Result<Vec<Organization>, sqlx::Error> {
    sqlx::query_as::<_, Organization>(
        "SELECT o.* FROM organizations o JOIN organization_users ou ON o.id = ou.organization_id WHERE ou.user_email = $1 ORDER BY o.id",
    )
    .bind(email)
    .fetch_all(pool)
    .await
}

/// Switches the active organization; the user must be a member of it.
pub async fn set_active_organization(
    pool: &SqlitePool,
    email: &str,
    organization_id: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query(
        "UPDATE users SET active_organization_id = $1, updated_at = $2 WHERE email = $3 AND EXISTS (SELECT 1 FROM organization_users WHERE organization_id = $1 AND user_email = $3)",
    )
    .bind(organization_id)
    .bind(Utc::now())
    .bind(email)
    .execute(pool)
    .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

pub async fn create_tag(
    pool: &SqlitePool,
    name: &str,
    organization_id: i64,
) -> Result<Tag, StoreError> {
    let now = Utc::now();
    let tag = sqlx::query_as::<_, Tag>(
        "INSERT INTO tags (name, organization_id, created_at, updated_at) VALUES ($1, $2, $3, $4) RETURNING *",
    )
    .bind(name)
    .bind(organization_id)
    .bind(now)
    .bind(now)
    .fetch_one(pool)
    .await?;
    Ok(tag)
}

pub async fn tags_for_organization(
    pool: &SqlitePool,
    organization_id: i64,
) -> Result<Vec<Tag>, sqlx::Error> {
    sqlx::query_as::<_, Tag>("SELECT * FROM tags WHERE organization_id = $1 ORDER BY name")
        .bind(organization_id)
        .fetch_all(pool)
        .await
}

pub async fn tags_for_item(pool: &SqlitePool, item_id: i64) -> Result<Vec<Tag>, sqlx::Error> {
    sqlx::query_as::<_, Tag>(
        "SELECT t.* FROM tags t JOIN item_tags it ON t.id = it.tag_id WHERE it.item_id = $1 ORDER BY t.name",
    )
    .bind(item_id)
    .fetch_all(pool)
    .await
}

pub async fn delete_tag(
    pool: &SqlitePool,
    id: i64,
    organization_id: i64,
) -> Result<(), StoreError> {
    let result = sqlx::query("DELETE FROM tags WHERE id = $1 AND organization_id = $2")
        .bind(id)
        .bind(organization_id)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(StoreError::NotFound);
    }
    Ok(())
}

/// Replaces any outstanding reset token of the user with a fresh one.
pub async fn create_reset_token(
    pool: &SqlitePool,
    email: &str,
    ttl: Duration,
) -> Result<String, StoreError> {
    let mut tx = pool.begin().await?;

    let exists = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users WHERE email = $1")
        .bind(email)
        .fetch_one(&mut *tx)
        .await?;
    if exists == 0 {
        return Err(StoreError::NotFound);
    }

    sqlx::query("DELETE FROM reset_tokens WHERE user_email = $1")
        .bind(email)
        .execute(&mut *tx)
        .await?;

    let now = Utc::now();
    let ttl = chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::minutes(5));
    let token = random_token(RESET_TOKEN_LEN);
    sqlx::query(
        "INSERT INTO reset_tokens (token, expired_at, created_at, user_email) VALUES ($1, $2, $3, $4)",
    )
    .bind(&token)
    .bind(now + ttl)
    .bind(now)
    .bind(email)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    log::info!("Password reset token issued for {}", email);
    Ok(token)
}

/// Sets a new password using a reset token. Unknown and expired tokens both
/// yield `NotFound`; expired ones are removed on the way.
pub async fn reset_password(
    pool: &SqlitePool,
    token: &str,
    new_password: &str,
) -> Result<String, StoreError> {
    let mut tx = pool.begin().await?;

    let reset = sqlx::query_as::<_, ResetToken>("SELECT * FROM reset_tokens WHERE token = $1")
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NotFound)?;

    sqlx::query("DELETE FROM reset_tokens WHERE id = $1")
        .bind(reset.id)
        .execute(&mut *tx)
        .await?;

    if reset.is_expired() {
        tx.commit().await?;
        log::info!("Expired reset token presented for {}", reset.user_email);
        return Err(StoreError::NotFound);
    }

    update_password(&mut tx, &reset.user_email, new_password).await?;
    tx.commit().await?;
    log::info!("Password updated for {}", reset.user_email);
    Ok(reset.user_email)
}

pub async fn cleanup_expired_reset_tokens(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
    let result = sqlx::query("DELETE FROM reset_tokens WHERE expired_at < $1")
        .bind(Utc::now())
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
