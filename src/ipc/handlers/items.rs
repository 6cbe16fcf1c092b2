use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::media;
use rusqlite::{params_from_iter, Connection, OptionalExtension, ToSql};
use serde_json::json;
use std::path::{Path, PathBuf};
use uuid::Uuid;

const DEFAULT_PAGE_SIZE: i64 = 6;

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<serde_json::Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> serde_json::Value {
        err(id, self.code, self.message, self.details)
    }
}

fn db_failed(e: rusqlite::Error) -> HandlerErr {
    HandlerErr {
        code: "db_query_failed",
        message: e.to_string(),
        details: None,
    }
}

fn get_required_str(params: &serde_json::Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr {
            code: "bad_params",
            message: format!("missing {}", key),
            details: None,
        })
}

fn category_name(conn: &Connection, category_id: &str) -> Result<Option<String>, HandlerErr> {
    conn.query_row(
        "SELECT name FROM categories WHERE id = ?",
        [category_id],
        |r| r.get(0),
    )
    .optional()
    .map_err(db_failed)
}

fn check_natural_key_free(
    conn: &Connection,
    name: &str,
    category_id: &str,
    is_vegan: bool,
    is_vegetarian: bool,
    exclude_item: Option<&str>,
) -> Result<(), HandlerErr> {
    let hit: Option<String> = conn
        .query_row(
            "SELECT id FROM food_items
             WHERE name = ? AND category_id = ? AND is_vegan = ? AND is_vegetarian = ?",
            (name, category_id, is_vegan as i64, is_vegetarian as i64),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_failed)?;
    match hit {
        Some(id) if Some(id.as_str()) != exclude_item => Err(HandlerErr {
            code: "duplicate_item",
            message: "a food item with this name, category, vegan, and vegetarian status already exists"
                .to_string(),
            details: Some(json!({ "name": name, "categoryId": category_id })),
        }),
        _ => Ok(()),
    }
}

fn apply_item_image(
    conn: &Connection,
    workspace: &Path,
    item_id: &str,
    item_name: &str,
    image_path: &str,
) -> Result<String, HandlerErr> {
    let source = PathBuf::from(image_path);
    if !source.is_file() {
        // Same as the management form: a missing upload keeps the default.
        return Ok(media::DEFAULT_ITEM_IMAGE.to_string());
    }
    let rel = media::place_item_image(workspace, item_id, item_name, &source).map_err(|e| {
        HandlerErr {
            code: "io_failed",
            message: e.to_string(),
            details: Some(json!({ "path": image_path })),
        }
    })?;
    conn.execute(
        "UPDATE food_items SET image = ? WHERE id = ?",
        (&rel, item_id),
    )
    .map_err(db_failed)?;
    Ok(rel)
}

fn items_create(
    conn: &Connection,
    workspace: &Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_str(params, "name")?.trim().to_string();
    if name.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "name must not be empty".to_string(),
            details: None,
        });
    }
    let category_id = get_required_str(params, "categoryId")?;
    let price = params.get("price").and_then(|v| v.as_f64());
    let Some(price) = price else {
        return Err(HandlerErr {
            code: "bad_params",
            message: "missing price".to_string(),
            details: None,
        });
    };
    if price < 0.0 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "price must be >= 0".to_string(),
            details: Some(json!({ "price": price })),
        });
    }
    let description = params
        .get("description")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let is_vegetarian = params
        .get("isVegetarian")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);
    let is_vegan = params
        .get("isVegan")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    if category_name(conn, &category_id)?.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "category not found".to_string(),
            details: Some(json!({ "categoryId": category_id })),
        });
    }
    check_natural_key_free(conn, &name, &category_id, is_vegan, is_vegetarian, None)?;

    let item_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO food_items(id, category_id, name, price, description, image, is_vegan, is_vegetarian)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &item_id,
            &category_id,
            &name,
            price,
            &description,
            media::DEFAULT_ITEM_IMAGE,
            is_vegan as i64,
            is_vegetarian as i64,
        ),
    )
    .map_err(|e| HandlerErr {
        code: "db_insert_failed",
        message: e.to_string(),
        details: Some(json!({ "table": "food_items" })),
    })?;

    // Insert first so the image file can carry the generated id in its name.
    let mut image = media::DEFAULT_ITEM_IMAGE.to_string();
    if let Some(image_path) = params.get("imagePath").and_then(|v| v.as_str()) {
        image = apply_item_image(conn, workspace, &item_id, &name, image_path)?;
    }

    Ok(json!({ "itemId": item_id, "name": name, "image": image }))
}

fn items_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let mut where_sql = String::from("1=1");
    let mut binds: Vec<Box<dyn ToSql>> = Vec::new();

    if let Some(cid) = params.get("categoryId").and_then(|v| v.as_str()) {
        where_sql.push_str(" AND fi.category_id = ?");
        binds.push(Box::new(cid.to_string()));
    }
    if let Some(search) = params.get("search").and_then(|v| v.as_str()) {
        where_sql.push_str(" AND LOWER(fi.name) LIKE ?");
        binds.push(Box::new(format!("%{}%", search.to_lowercase())));
    }
    if let Some(veg) = params.get("vegetarian").and_then(|v| v.as_bool()) {
        where_sql.push_str(" AND fi.is_vegetarian = ?");
        binds.push(Box::new(veg as i64));
    }
    if let Some(vegan) = params.get("vegan").and_then(|v| v.as_bool()) {
        where_sql.push_str(" AND fi.is_vegan = ?");
        binds.push(Box::new(vegan as i64));
    }

    let total: i64 = conn
        .query_row(
            &format!(
                "SELECT COUNT(*) FROM food_items fi WHERE {}",
                where_sql
            ),
            params_from_iter(binds.iter().map(|b| b.as_ref())),
            |r| r.get(0),
        )
        .map_err(db_failed)?;

    let page = params.get("page").and_then(|v| v.as_i64()).unwrap_or(1).max(1);
    let page_size = params
        .get("pageSize")
        .and_then(|v| v.as_i64())
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .max(1);
    let offset = (page - 1) * page_size;

    let sql = format!(
        "SELECT fi.id, fi.name, fi.category_id, c.name, fi.price, fi.description, fi.image,
                fi.is_vegan, fi.is_vegetarian
         FROM food_items fi
         JOIN categories c ON c.id = fi.category_id
         WHERE {}
         ORDER BY c.name, fi.name
         LIMIT ? OFFSET ?",
        where_sql
    );
    binds.push(Box::new(page_size));
    binds.push(Box::new(offset));

    let mut stmt = conn.prepare(&sql).map_err(db_failed)?;
    let items = stmt
        .query_map(params_from_iter(binds.iter().map(|b| b.as_ref())), |r| {
            let id: String = r.get(0)?;
            let name: String = r.get(1)?;
            let category_id: String = r.get(2)?;
            let category: String = r.get(3)?;
            let price: f64 = r.get(4)?;
            let description: String = r.get(5)?;
            let image: String = r.get(6)?;
            let is_vegan: i64 = r.get(7)?;
            let is_vegetarian: i64 = r.get(8)?;
            Ok(json!({
                "id": id,
                "name": name,
                "categoryId": category_id,
                "category": category,
                "price": price,
                "description": description,
                "image": image,
                "isVegan": is_vegan != 0,
                "isVegetarian": is_vegetarian != 0
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed)?;

    let total_pages = if total == 0 {
        1
    } else {
        (total + page_size - 1) / page_size
    };
    Ok(json!({
        "items": items,
        "total": total,
        "page": page,
        "pageSize": page_size,
        "totalPages": total_pages
    }))
}

struct ItemRow {
    name: String,
    category_id: String,
    price: f64,
    description: String,
    is_vegan: bool,
    is_vegetarian: bool,
}

fn load_item(conn: &Connection, item_id: &str) -> Result<ItemRow, HandlerErr> {
    let row = conn
        .query_row(
            "SELECT name, category_id, price, description, is_vegan, is_vegetarian
             FROM food_items WHERE id = ?",
            [item_id],
            |r| {
                Ok(ItemRow {
                    name: r.get(0)?,
                    category_id: r.get(1)?,
                    price: r.get(2)?,
                    description: r.get(3)?,
                    is_vegan: r.get::<_, i64>(4)? != 0,
                    is_vegetarian: r.get::<_, i64>(5)? != 0,
                })
            },
        )
        .optional()
        .map_err(db_failed)?;
    row.ok_or_else(|| HandlerErr {
        code: "not_found",
        message: "food item not found".to_string(),
        details: None,
    })
}

fn items_update(
    conn: &Connection,
    workspace: &Path,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let item_id = get_required_str(params, "itemId")?;
    let current = load_item(conn, &item_id)?;
    let patch = params.get("patch").cloned().unwrap_or_else(|| json!({}));

    let name = patch
        .get("name")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .unwrap_or(current.name);
    if name.is_empty() {
        return Err(HandlerErr {
            code: "bad_params",
            message: "name must not be empty".to_string(),
            details: None,
        });
    }
    let category_id = patch
        .get("categoryId")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(current.category_id);
    let price = patch
        .get("price")
        .and_then(|v| v.as_f64())
        .unwrap_or(current.price);
    if price < 0.0 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "price must be >= 0".to_string(),
            details: Some(json!({ "price": price })),
        });
    }
    let description = patch
        .get("description")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .unwrap_or(current.description);
    let is_vegan = patch
        .get("isVegan")
        .and_then(|v| v.as_bool())
        .unwrap_or(current.is_vegan);
    let is_vegetarian = patch
        .get("isVegetarian")
        .and_then(|v| v.as_bool())
        .unwrap_or(current.is_vegetarian);

    if category_name(conn, &category_id)?.is_none() {
        return Err(HandlerErr {
            code: "not_found",
            message: "category not found".to_string(),
            details: Some(json!({ "categoryId": category_id })),
        });
    }
    check_natural_key_free(
        conn,
        &name,
        &category_id,
        is_vegan,
        is_vegetarian,
        Some(&item_id),
    )?;

    conn.execute(
        "UPDATE food_items
         SET name = ?, category_id = ?, price = ?, description = ?, is_vegan = ?, is_vegetarian = ?
         WHERE id = ?",
        (
            &name,
            &category_id,
            price,
            &description,
            is_vegan as i64,
            is_vegetarian as i64,
            &item_id,
        ),
    )
    .map_err(db_failed)?;

    if let Some(image_path) = patch.get("imagePath").and_then(|v| v.as_str()) {
        apply_item_image(conn, workspace, &item_id, &name, image_path)?;
    }

    Ok(json!({ "itemId": item_id, "ok": true }))
}

fn items_delete(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let item_id = get_required_str(params, "itemId")?;
    load_item(conn, &item_id)?;

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    // Explicitly delete in dependency order (no ON DELETE CASCADE).
    for (sql, table) in [
        (
            "DELETE FROM cart_items WHERE food_item_id = ?",
            "cart_items",
        ),
        (
            "DELETE FROM order_history WHERE food_item_id = ?",
            "order_history",
        ),
        ("DELETE FROM food_items WHERE id = ?", "food_items"),
    ] {
        if let Err(e) = tx.execute(sql, [&item_id]) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_delete_failed",
                message: e.to_string(),
                details: Some(json!({ "table": table })),
            });
        }
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({ "ok": true }))
}

fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &Path, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &workspace, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "items.create" => Some(with_db(state, req, |c, w, p| items_create(c, w, p))),
        "items.list" => Some(with_db(state, req, |c, _, p| items_list(c, p))),
        "items.update" => Some(with_db(state, req, |c, w, p| items_update(c, w, p))),
        "items.delete" => Some(with_db(state, req, |c, _, p| items_delete(c, p))),
        _ => None,
    }
}
