//! Backpack ID allocation.
//!
//! A backpack ID is the owner's prefix followed by a zero-padded sequence
//! number scoped to that prefix, e.g. `ABC0007`. The counter for each prefix
//! lives in one `backpack_id_next_numbers` row and is advanced with a single
//! upsert, so concurrent allocations for the same prefix serialize on that
//! row's write while different prefixes never share state.

use sqlx::{SqliteConnection, SqlitePool};

use crate::{errors::AllocError, utils::random_uppercase};

pub const PREFIX_LEN: usize = 3;

/// Sequence numbers wider than this are emitted unpadded, not rejected.
pub const SEQUENCE_WIDTH: usize = 4;

pub fn generate_prefix() -> String {
    random_uppercase(PREFIX_LEN)
}

/// Prefix assigned at registration: the first characters of the email, uppercased.
pub fn prefix_from_email(email: &str) -> String {
    email.chars().take(PREFIX_LEN).collect::<String>().to_uppercase()
}

pub fn format_backpack_id(prefix: &str, number: i64) -> String {
    format!("{prefix}{number:0width$}", width = SEQUENCE_WIDTH)
}

/// Returns the user's prefix, assigning a random one first if it has none.
///
/// The assignment only applies while the prefix is still empty, so two
/// racing first allocations agree on whichever prefix was written first.
pub async fn ensure_prefix(pool: &SqlitePool, email: &str) -> Result<String, AllocError> {
    let candidate = generate_prefix();
    let result = sqlx::query(
        "UPDATE users SET prefix = $1 WHERE email = $2 AND (prefix IS NULL OR prefix = '')",
    )
    .bind(&candidate)
    .bind(email)
    .execute(pool)
    .await?;
    if result.rows_affected() > 0 {
        log::info!("Assigned prefix {} to {}", candidate, email);
    }

    sqlx::query_scalar::<_, String>("SELECT prefix FROM users WHERE email = $1")
        .bind(email)
        .fetch_optional(pool)
        .await?
        .ok_or(AllocError::UserNotFound)
}

/// Advances the counter for `prefix` and returns the value to use.
///
/// The first allocation for a prefix yields 1. Must be the first statement of
/// the caller's transaction so SQLite takes the write lock up front instead
/// of upgrading a read snapshot.
pub async fn next_number(conn: &mut SqliteConnection, prefix: &str) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO backpack_id_next_numbers (backpack_id, number) VALUES ($1, 1) \
         ON CONFLICT (backpack_id) DO UPDATE SET number = number + 1 \
         RETURNING number",
    )
    .bind(prefix)
    .fetch_one(conn)
    .await
}

/// Allocates a backpack ID in its own transaction.
pub async fn allocate(pool: &SqlitePool, prefix: &str) -> Result<String, AllocError> {
    let mut tx = pool.begin().await?;
    let number = next_number(&mut tx, prefix).await?;
    tx.commit().await?;
    Ok(format_backpack_id(prefix, number))
}
