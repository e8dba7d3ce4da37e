use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};

use crate::{
    allocator,
    db,
    errors::{AllocError, StoreError},
    structs::{Item, ItemDetails, ItemSummary},
};

#[derive(Debug, Default, Clone)]
pub struct ItemChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub parent_id: Option<i64>,
    pub tag_ids: Option<Vec<i64>>,
}

#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("item not found")]
    NotFound,

    #[error("invalid parent item")]
    InvalidParent,

    #[error(transparent)]
    Alloc(#[from] AllocError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<sqlx::Error> for ItemError {
    fn from(err: sqlx::Error) -> Self {
        ItemError::Store(err.into())
    }
}

/// Creates an item with a freshly allocated backpack ID.
///
/// The counter advance and the item insert commit together; on any failure
/// neither is kept.
pub async fn create_item(
    pool: &SqlitePool,
    email: &str,
    name: &str,
    description: &str,
    parent_id: Option<i64>,
) -> Result<ItemDetails, ItemError> {
    let prefix = allocator::ensure_prefix(pool, email).await?;

    let mut tx = pool.begin().await?;
    let number = allocator::next_number(&mut tx, &prefix).await?;
    let backpack_id = allocator::format_backpack_id(&prefix, number);

    if let Some(parent) = parent_id {
        if !owns_item(&mut tx, parent, email).await? {
            return Err(ItemError::InvalidParent);
        }
    }

    let now = Utc::now();
    let item = sqlx::query_as::<_, Item>(
        "INSERT INTO items (name, description, backpack_id, added_at, created_at, updated_at, user_email, parent_id) VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
    )
    .bind(name)
    .bind(description)
    .bind(&backpack_id)
    .bind(now)
    .bind(now)
    .bind(now)
    .bind(email)
    .bind(parent_id)
    .fetch_one(&mut *tx)
    .await?;

    tx.commit().await?;
    log::info!("Item {} created as {} for {}", item.id, backpack_id, email);
    load_details(pool, item).await
}

pub async fn get_item(pool: &SqlitePool, id: i64, email: &str) -> Result<ItemDetails, ItemError> {
    let item = sqlx::query_as::<_, Item>("SELECT * FROM items WHERE id = $1 AND user_email = $2")
        .bind(id)
        .bind(email)
        .fetch_optional(pool)
        .await?
        .ok_or(ItemError::NotFound)?;
    load_details(pool, item).await
}

/// Lists the user's items, optionally filtered by a case-insensitive name substring.
pub async fn list_items(
    pool: &SqlitePool,
    email: &str,
    name_filter: Option<&str>,
) -> Result<Vec<ItemDetails>, ItemError> {
    let items = match name_filter.filter(|f| !f.is_empty()) {
        Some(filter) => {
            sqlx::query_as::<_, Item>(
                "SELECT * FROM items WHERE user_email = $1 AND name LIKE $2 ESCAPE '\\' ORDER BY id",
            )
            .bind(email)
            .bind(format!("%{}%", escape_like(filter)))
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Item>("SELECT * FROM items WHERE user_email = $1 ORDER BY id")
                .bind(email)
                .fetch_all(pool)
                .await?
        }
    };

    let mut details = Vec::with_capacity(items.len());
    for item in items {
        details.push(load_details(pool, item).await?);
    }
    Ok(details)
}

pub async fn items_by_tag(
    pool: &SqlitePool,
    tag_id: i64,
    email: &str,
) -> Result<Vec<ItemDetails>, ItemError> {
    let items = sqlx::query_as::<_, Item>(
        "SELECT i.* FROM items i JOIN item_tags it ON i.id = it.item_id WHERE it.tag_id = $1 AND i.user_email = $2 ORDER BY i.id",
    )
    .bind(tag_id)
    .bind(email)
    .fetch_all(pool)
    .await?;

    let mut details = Vec::with_capacity(items.len());
    for item in items {
        details.push(load_details(pool, item).await?);
    }
    Ok(details)
}

/// Applies the non-empty fields of `changes`. A tag list replaces the item's
/// tags; only tags of organizations the user belongs to are attached.
pub async fn update_item(
    pool: &SqlitePool,
    id: i64,
    email: &str,
    changes: ItemChanges,
) -> Result<ItemDetails, ItemError> {
    let mut tx = pool.begin().await?;

    if !owns_item(&mut tx, id, email).await? {
        return Err(ItemError::NotFound);
    }

    if let Some(parent) = changes.parent_id {
        if parent == id
            || !owns_item(&mut tx, parent, email).await?
            || is_descendant(&mut tx, parent, id).await?
        {
            return Err(ItemError::InvalidParent);
        }
    }

    let name = changes.name.filter(|n| !n.is_empty());
    let description = changes.description.filter(|d| !d.is_empty());

    sqlx::query(
        "UPDATE items SET name = COALESCE($1, name), description = COALESCE($2, description), parent_id = COALESCE($3, parent_id), updated_at = $4 WHERE id = $5",
    )
    .bind(name)
    .bind(description)
    .bind(changes.parent_id)
    .bind(Utc::now())
    .bind(id)
    .execute(&mut *tx)
    .await?;

    if let Some(tag_ids) = changes.tag_ids {
        sqlx::query("DELETE FROM item_tags WHERE item_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        for tag_id in tag_ids {
            sqlx::query(
                "INSERT OR IGNORE INTO item_tags (item_id, tag_id) SELECT $1, t.id FROM tags t JOIN organization_users ou ON ou.organization_id = t.organization_id WHERE t.id = $2 AND ou.user_email = $3",
            )
            .bind(id)
            .bind(tag_id)
            .bind(email)
            .execute(&mut *tx)
            .await?;
        }
    }

    tx.commit().await?;
    get_item(pool, id, email).await
}

pub async fn delete_item(pool: &SqlitePool, id: i64, email: &str) -> Result<(), ItemError> {
    let result = sqlx::query("DELETE FROM items WHERE id = $1 AND user_email = $2")
        .bind(id)
        .bind(email)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ItemError::NotFound);
    }
    log::info!("Item {} deleted by {}", id, email);
    Ok(())
}

async fn owns_item(conn: &mut SqliteConnection, id: i64, email: &str) -> Result<bool, sqlx::Error> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM items WHERE id = $1 AND user_email = $2",
    )
    .bind(id)
    .bind(email)
    .fetch_one(conn)
    .await?;
    Ok(count > 0)
}

/// Walks up from `candidate` and reports whether `ancestor` is on its parent chain.
async fn is_descendant(
    conn: &mut SqliteConnection,
    candidate: i64,
    ancestor: i64,
) -> Result<bool, sqlx::Error> {
    let mut current = Some(candidate);
    let mut steps = 0;
    while let Some(id) = current {
        if id == ancestor {
            return Ok(true);
        }
        steps += 1;
        if steps > 10_000 {
            // existing data already contains a cycle
            return Ok(true);
        }
        current = sqlx::query_scalar::<_, Option<i64>>("SELECT parent_id FROM items WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?
            .flatten();
    }
    Ok(false)
}

async fn load_details(pool: &SqlitePool, item: Item) -> Result<ItemDetails, ItemError> {
    let parent = match item.parent_id {
        Some(parent_id) => {
            sqlx::query_as::<_, ItemSummary>(
                "SELECT id, name, backpack_id FROM items WHERE id = $1",
            )
            .bind(parent_id)
            .fetch_optional(pool)
            .await?
        }
        None => None,
    };
    let children = sqlx::query_as::<_, ItemSummary>(
        "SELECT id, name, backpack_id FROM items WHERE parent_id = $1 ORDER BY id",
    )
    .bind(item.id)
    .fetch_all(pool)
    .await?;
    let tags = db::tags_for_item(pool, item.id).await?;

    Ok(ItemDetails {
        item,
        parent,
        children,
        tags,
    })
}

fn escape_like(input: &str) -> String {
    input
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
