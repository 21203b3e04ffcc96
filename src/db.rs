use anyhow::{Context, Result};
use log::info;
use rusqlite::{params, Connection};
use std::str::FromStr;
use std::sync::Arc;

use crate::auth::Role;

/// Shared handle to the embedded relational store.
///
/// Every logical operation takes the lock for its own duration only, so the
/// connection is released on every path including failure.
pub type Db = Arc<tokio::sync::Mutex<Connection>>;

/// A staff member. Waiters and admins are always bound to exactly one
/// restaurant; superadmins never are.
#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub tg_username: Option<String>,
    pub tg_id: String,
    pub role: Role,
    pub restaurant_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Restaurant {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub restaurant_id: i64,
}

/// A dish. `restaurant_id` is denormalized from the category so ownership
/// checks stay a single indexed lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct Dish {
    pub id: i64,
    pub name: String,
    pub category_id: i64,
    pub restaurant_id: i64,
    pub composition: Option<String>,
    pub description: Option<String>,
    pub cook_time: Option<f64>,
    pub video_url: Option<String>,
    pub ingredients_photo_url: Option<String>,
    pub ready_photo_url: Option<String>,
    pub video_file_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestResult {
    pub id: i64,
    pub user_id: i64,
    pub score: i64,
    pub passed_at: Option<String>,
}

/// Fields collected by the dish wizard before the single final insert
#[derive(Debug, Clone, Default)]
pub struct NewDish {
    pub name: String,
    pub category_id: i64,
    pub restaurant_id: i64,
    pub composition: Option<String>,
    pub description: Option<String>,
    pub cook_time: Option<f64>,
    pub video_url: Option<String>,
    pub ingredients_photo_url: Option<String>,
    pub ready_photo_url: Option<String>,
}

/// Fields the edit wizard may change in one update
#[derive(Debug, Clone)]
pub struct DishUpdate {
    pub name: String,
    pub category_id: i64,
    pub composition: Option<String>,
    pub description: Option<String>,
    pub video_url: Option<String>,
}

/// Initialize the database schema
pub fn init_database_schema(conn: &Connection) -> Result<()> {
    info!("Initializing database schema...");

    // Cascade semantics live in the schema, not in handler code
    conn.execute_batch("PRAGMA foreign_keys = ON;")
        .context("Failed to enable foreign key enforcement")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS restaurants (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL
        )",
        [],
    )
    .context("Failed to create restaurants table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            tg_username TEXT,
            tg_id TEXT NOT NULL UNIQUE,
            role TEXT NOT NULL,
            restaurant_id INTEGER REFERENCES restaurants(id) ON DELETE CASCADE
        )",
        [],
    )
    .context("Failed to create users table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            restaurant_id INTEGER NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE
        )",
        [],
    )
    .context("Failed to create categories table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS dishes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            category_id INTEGER NOT NULL REFERENCES categories(id) ON DELETE CASCADE,
            restaurant_id INTEGER NOT NULL REFERENCES restaurants(id) ON DELETE CASCADE,
            composition TEXT,
            description TEXT,
            cook_time REAL,
            video_url TEXT,
            ingredients_photo_url TEXT,
            ready_photo_url TEXT,
            video_file_id TEXT
        )",
        [],
    )
    .context("Failed to create dishes table")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS test_results (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            score INTEGER NOT NULL,
            passed_at TEXT
        )",
        [],
    )
    .context("Failed to create test_results table")?;

    // Backing table for the expiring key-value store
    conn.execute(
        "CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            expires_at INTEGER NOT NULL
        )",
        [],
    )
    .context("Failed to create kv_entries table")?;

    info!("Database schema initialized successfully");
    Ok(())
}

fn user_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<User> {
    let role_str: String = row.get(5)?;
    let role = Role::from_str(&role_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(User {
        id: row.get(0)?,
        first_name: row.get(1)?,
        last_name: row.get(2)?,
        tg_username: row.get(3)?,
        tg_id: row.get(4)?,
        role,
        restaurant_id: row.get(6)?,
    })
}

const USER_COLUMNS: &str = "id, first_name, last_name, tg_username, tg_id, role, restaurant_id";

/// Create a new user record
pub fn create_user(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
    tg_username: Option<&str>,
    tg_id: &str,
    role: Role,
    restaurant_id: Option<i64>,
) -> Result<User> {
    info!("Creating user with role {} for tg_id {}", role, tg_id);

    conn.execute(
        "INSERT INTO users (first_name, last_name, tg_username, tg_id, role, restaurant_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![first_name, last_name, tg_username, tg_id, role.as_str(), restaurant_id],
    )
    .context("Failed to insert user")?;

    get_user_by_tg_id(conn, tg_id)?.context("User missing right after insert")
}

/// Create a user unless the Telegram id is already taken.
///
/// Returns `None` when a record for `tg_id` already exists. The UNIQUE
/// constraint makes the check-and-insert a single atomic statement, so two
/// concurrent registrations for one caller still produce at most one row.
pub fn create_user_if_absent(
    conn: &Connection,
    first_name: &str,
    last_name: &str,
    tg_username: Option<&str>,
    tg_id: &str,
    role: Role,
    restaurant_id: Option<i64>,
) -> Result<Option<User>> {
    let inserted = conn
        .execute(
            "INSERT INTO users (first_name, last_name, tg_username, tg_id, role, restaurant_id)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(tg_id) DO NOTHING",
            params![first_name, last_name, tg_username, tg_id, role.as_str(), restaurant_id],
        )
        .context("Failed to insert user")?;

    if inserted == 0 {
        info!("User with tg_id {} already exists, skipping insert", tg_id);
        return Ok(None);
    }

    info!("Registered user with tg_id {} as {}", tg_id, role);
    get_user_by_tg_id(conn, tg_id)
}

/// Look up a user by Telegram id
pub fn get_user_by_tg_id(conn: &Connection, tg_id: &str) -> Result<Option<User>> {
    let mut stmt = conn
        .prepare(&format!("SELECT {USER_COLUMNS} FROM users WHERE tg_id = ?1"))
        .context("Failed to prepare user lookup")?;

    match stmt.query_row(params![tg_id], user_from_row) {
        Ok(user) => Ok(Some(user)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read user"),
    }
}

/// List the waiters of one restaurant. Tenant filtering happens in the query
/// itself, never by filtering an unscoped result in process.
pub fn get_waiters_by_restaurant(conn: &Connection, restaurant_id: i64) -> Result<Vec<User>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE role = 'waiter' AND restaurant_id = ?1 ORDER BY id"
        ))
        .context("Failed to prepare waiter listing")?;

    let rows = stmt
        .query_map(params![restaurant_id], user_from_row)
        .context("Failed to list waiters")?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read waiter rows")
}

/// Delete a waiter, but only within the given restaurant
pub fn delete_waiter_scoped(conn: &Connection, user_id: i64, restaurant_id: i64) -> Result<bool> {
    let rows_affected = conn
        .execute(
            "DELETE FROM users WHERE id = ?1 AND restaurant_id = ?2 AND role = 'waiter'",
            params![user_id, restaurant_id],
        )
        .context("Failed to delete waiter")?;

    Ok(rows_affected > 0)
}

/// Create a new restaurant
pub fn create_restaurant(conn: &Connection, name: &str) -> Result<Restaurant> {
    conn.execute("INSERT INTO restaurants (name) VALUES (?1)", params![name])
        .context("Failed to insert restaurant")?;

    let id = conn.last_insert_rowid();
    info!("Restaurant created with ID: {}", id);

    Ok(Restaurant {
        id,
        name: name.to_string(),
    })
}

/// Read a restaurant by ID
pub fn get_restaurant(conn: &Connection, restaurant_id: i64) -> Result<Option<Restaurant>> {
    let mut stmt = conn
        .prepare("SELECT id, name FROM restaurants WHERE id = ?1")
        .context("Failed to prepare restaurant lookup")?;

    match stmt.query_row(params![restaurant_id], |row| {
        Ok(Restaurant {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    }) {
        Ok(restaurant) => Ok(Some(restaurant)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read restaurant"),
    }
}

/// Delete a restaurant. The schema cascades to its users, categories and
/// dishes, leaving no orphaned rows behind.
pub fn delete_restaurant(conn: &Connection, restaurant_id: i64) -> Result<bool> {
    let rows_affected = conn
        .execute("DELETE FROM restaurants WHERE id = ?1", params![restaurant_id])
        .context("Failed to delete restaurant")?;

    if rows_affected > 0 {
        info!("Restaurant {} deleted with cascade", restaurant_id);
    }
    Ok(rows_affected > 0)
}

fn category_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Category> {
    Ok(Category {
        id: row.get(0)?,
        name: row.get(1)?,
        restaurant_id: row.get(2)?,
    })
}

/// Create a new category owned by a restaurant
pub fn create_category(conn: &Connection, name: &str, restaurant_id: i64) -> Result<Category> {
    conn.execute(
        "INSERT INTO categories (name, restaurant_id) VALUES (?1, ?2)",
        params![name, restaurant_id],
    )
    .context("Failed to insert category")?;

    Ok(Category {
        id: conn.last_insert_rowid(),
        name: name.to_string(),
        restaurant_id,
    })
}

/// Fetch a category by id within one restaurant. A category owned by another
/// restaurant is indistinguishable from a missing one.
pub fn get_category_scoped(
    conn: &Connection,
    category_id: i64,
    restaurant_id: i64,
) -> Result<Option<Category>> {
    let mut stmt = conn
        .prepare("SELECT id, name, restaurant_id FROM categories WHERE id = ?1 AND restaurant_id = ?2")
        .context("Failed to prepare category lookup")?;

    match stmt.query_row(params![category_id, restaurant_id], category_from_row) {
        Ok(category) => Ok(Some(category)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read category"),
    }
}

/// List the categories of one restaurant
pub fn get_categories_by_restaurant(conn: &Connection, restaurant_id: i64) -> Result<Vec<Category>> {
    let mut stmt = conn
        .prepare("SELECT id, name, restaurant_id FROM categories WHERE restaurant_id = ?1 ORDER BY id")
        .context("Failed to prepare category listing")?;

    let rows = stmt
        .query_map(params![restaurant_id], category_from_row)
        .context("Failed to list categories")?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read category rows")
}

/// Rename a category within one restaurant
pub fn rename_category_scoped(
    conn: &Connection,
    category_id: i64,
    restaurant_id: i64,
    new_name: &str,
) -> Result<bool> {
    let rows_affected = conn
        .execute(
            "UPDATE categories SET name = ?1 WHERE id = ?2 AND restaurant_id = ?3",
            params![new_name, category_id, restaurant_id],
        )
        .context("Failed to rename category")?;

    Ok(rows_affected > 0)
}

/// Delete a category within one restaurant; its dishes cascade
pub fn delete_category_scoped(
    conn: &Connection,
    category_id: i64,
    restaurant_id: i64,
) -> Result<bool> {
    let rows_affected = conn
        .execute(
            "DELETE FROM categories WHERE id = ?1 AND restaurant_id = ?2",
            params![category_id, restaurant_id],
        )
        .context("Failed to delete category")?;

    Ok(rows_affected > 0)
}

fn dish_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Dish> {
    Ok(Dish {
        id: row.get(0)?,
        name: row.get(1)?,
        category_id: row.get(2)?,
        restaurant_id: row.get(3)?,
        composition: row.get(4)?,
        description: row.get(5)?,
        cook_time: row.get(6)?,
        video_url: row.get(7)?,
        ingredients_photo_url: row.get(8)?,
        ready_photo_url: row.get(9)?,
        video_file_id: row.get(10)?,
    })
}

const DISH_COLUMNS: &str = "id, name, category_id, restaurant_id, composition, description, \
                            cook_time, video_url, ingredients_photo_url, ready_photo_url, video_file_id";

/// Create a new dish from a completed wizard draft
pub fn create_dish(conn: &Connection, dish: &NewDish) -> Result<Dish> {
    conn.execute(
        "INSERT INTO dishes (name, category_id, restaurant_id, composition, description,
                             cook_time, video_url, ingredients_photo_url, ready_photo_url)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
        params![
            dish.name,
            dish.category_id,
            dish.restaurant_id,
            dish.composition,
            dish.description,
            dish.cook_time,
            dish.video_url,
            dish.ingredients_photo_url,
            dish.ready_photo_url,
        ],
    )
    .context("Failed to insert dish")?;

    let id = conn.last_insert_rowid();
    info!("Dish created with ID: {}", id);

    get_dish_scoped(conn, id, dish.restaurant_id)?.context("Dish missing right after insert")
}

/// Fetch a dish by id within one restaurant. Cross-tenant access reports
/// not-found, identical to a missing dish.
pub fn get_dish_scoped(conn: &Connection, dish_id: i64, restaurant_id: i64) -> Result<Option<Dish>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {DISH_COLUMNS} FROM dishes WHERE id = ?1 AND restaurant_id = ?2"
        ))
        .context("Failed to prepare dish lookup")?;

    match stmt.query_row(params![dish_id, restaurant_id], dish_from_row) {
        Ok(dish) => Ok(Some(dish)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e).context("Failed to read dish"),
    }
}

/// List the dishes of one category, scoped to the caller's restaurant
pub fn get_dishes_by_category(
    conn: &Connection,
    category_id: i64,
    restaurant_id: i64,
) -> Result<Vec<Dish>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {DISH_COLUMNS} FROM dishes
             WHERE category_id = ?1 AND restaurant_id = ?2 ORDER BY id"
        ))
        .context("Failed to prepare dish listing")?;

    let rows = stmt
        .query_map(params![category_id, restaurant_id], dish_from_row)
        .context("Failed to list dishes")?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read dish rows")
}

/// List all dishes of one restaurant
pub fn get_dishes_by_restaurant(conn: &Connection, restaurant_id: i64) -> Result<Vec<Dish>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {DISH_COLUMNS} FROM dishes WHERE restaurant_id = ?1 ORDER BY id"
        ))
        .context("Failed to prepare dish listing")?;

    let rows = stmt
        .query_map(params![restaurant_id], dish_from_row)
        .context("Failed to list dishes")?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read dish rows")
}

/// Apply an edit-wizard update to a dish within one restaurant
pub fn update_dish_scoped(
    conn: &Connection,
    dish_id: i64,
    restaurant_id: i64,
    update: &DishUpdate,
) -> Result<bool> {
    let rows_affected = conn
        .execute(
            "UPDATE dishes SET name = ?1, category_id = ?2, composition = ?3,
                               description = ?4, video_url = ?5
             WHERE id = ?6 AND restaurant_id = ?7",
            params![
                update.name,
                update.category_id,
                update.composition,
                update.description,
                update.video_url,
                dish_id,
                restaurant_id,
            ],
        )
        .context("Failed to update dish")?;

    Ok(rows_affected > 0)
}

/// Delete a dish within one restaurant
pub fn delete_dish_scoped(conn: &Connection, dish_id: i64, restaurant_id: i64) -> Result<bool> {
    let rows_affected = conn
        .execute(
            "DELETE FROM dishes WHERE id = ?1 AND restaurant_id = ?2",
            params![dish_id, restaurant_id],
        )
        .context("Failed to delete dish")?;

    Ok(rows_affected > 0)
}

/// Cache the Telegram file id of a dish's uploaded video so later card
/// toggles can re-send it without re-uploading
pub fn set_dish_video_file_id(conn: &Connection, dish_id: i64, video_file_id: &str) -> Result<bool> {
    let rows_affected = conn
        .execute(
            "UPDATE dishes SET video_file_id = ?1 WHERE id = ?2",
            params![video_file_id, dish_id],
        )
        .context("Failed to cache dish video file id")?;

    Ok(rows_affected > 0)
}

/// Record a staff quiz result
pub fn add_test_result(
    conn: &Connection,
    user_id: i64,
    score: i64,
    passed_at: Option<&str>,
) -> Result<TestResult> {
    conn.execute(
        "INSERT INTO test_results (user_id, score, passed_at) VALUES (?1, ?2, ?3)",
        params![user_id, score, passed_at],
    )
    .context("Failed to insert test result")?;

    Ok(TestResult {
        id: conn.last_insert_rowid(),
        user_id,
        score,
        passed_at: passed_at.map(|s| s.to_string()),
    })
}

/// List a user's quiz results
pub fn get_test_results_by_user(conn: &Connection, user_id: i64) -> Result<Vec<TestResult>> {
    let mut stmt = conn
        .prepare("SELECT id, user_id, score, passed_at FROM test_results WHERE user_id = ?1 ORDER BY id")
        .context("Failed to prepare test result listing")?;

    let rows = stmt
        .query_map(params![user_id], |row| {
            Ok(TestResult {
                id: row.get(0)?,
                user_id: row.get(1)?,
                score: row.get(2)?,
                passed_at: row.get(3)?,
            })
        })
        .context("Failed to list test results")?;

    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("Failed to read test result rows")
}
