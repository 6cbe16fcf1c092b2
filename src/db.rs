use rusqlite::{Connection, OptionalExtension};
use std::path::Path;
use uuid::Uuid;

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join("menu.sqlite3");
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS categories(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL UNIQUE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS food_items(
            id TEXT PRIMARY KEY,
            category_id TEXT NOT NULL,
            name TEXT NOT NULL,
            price REAL NOT NULL,
            description TEXT NOT NULL,
            image TEXT NOT NULL,
            is_vegan INTEGER NOT NULL,
            is_vegetarian INTEGER NOT NULL,
            FOREIGN KEY(category_id) REFERENCES categories(id),
            UNIQUE(name, category_id, is_vegan, is_vegetarian)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_food_items_category ON food_items(category_id)",
        [],
    )?;

    // Early workspaces predate the image column. Add and backfill if needed.
    ensure_food_items_image(&conn)?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS cart_items(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            food_item_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            FOREIGN KEY(food_item_id) REFERENCES food_items(id),
            UNIQUE(user_id, food_item_id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cart_items_user ON cart_items(user_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_cart_items_item ON cart_items(food_item_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS orders(
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            total_amount REAL NOT NULL,
            created_at TEXT NOT NULL,
            status TEXT NOT NULL
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_orders_user_created ON orders(user_id, created_at)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS order_history(
            id TEXT PRIMARY KEY,
            order_id TEXT NOT NULL,
            food_item_id TEXT NOT NULL,
            quantity INTEGER NOT NULL,
            FOREIGN KEY(order_id) REFERENCES orders(id),
            FOREIGN KEY(food_item_id) REFERENCES food_items(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_order_history_order ON order_history(order_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_order_history_item ON order_history(food_item_id)",
        [],
    )?;

    Ok(conn)
}

fn ensure_food_items_image(conn: &Connection) -> anyhow::Result<()> {
    if table_has_column(conn, "food_items", "image")? {
        return Ok(());
    }
    let sql = format!(
        "ALTER TABLE food_items ADD COLUMN image TEXT NOT NULL DEFAULT '{}'",
        crate::media::DEFAULT_ITEM_IMAGE
    );
    conn.execute(&sql, [])?;
    Ok(())
}

/// Resolve a category id by exact name, creating the row on first sight.
/// Two writers racing on the same new name are serialized by the UNIQUE
/// constraint; the loser re-reads the winner's row.
pub fn get_or_create_category(conn: &Connection, name: &str) -> anyhow::Result<String> {
    let existing: Option<String> = conn
        .query_row("SELECT id FROM categories WHERE name = ?", [name], |r| {
            r.get(0)
        })
        .optional()?;
    if let Some(id) = existing {
        return Ok(id);
    }

    let id = Uuid::new_v4().to_string();
    match conn.execute("INSERT INTO categories(id, name) VALUES(?, ?)", (&id, name)) {
        Ok(_) => Ok(id),
        Err(_) => {
            let id: String =
                conn.query_row("SELECT id FROM categories WHERE name = ?", [name], |r| {
                    r.get(0)
                })?;
            Ok(id)
        }
    }
}

/// Natural-key lookup used by duplicate detection at import and direct
/// creation: (name, category, is_vegan, is_vegetarian).
pub fn food_item_exists(
    conn: &Connection,
    name: &str,
    category_id: &str,
    is_vegan: bool,
    is_vegetarian: bool,
) -> anyhow::Result<bool> {
    let hit: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM food_items
             WHERE name = ? AND category_id = ? AND is_vegan = ? AND is_vegetarian = ?",
            (name, category_id, is_vegan as i64, is_vegetarian as i64),
            |r| r.get(0),
        )
        .optional()?;
    Ok(hit.is_some())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
