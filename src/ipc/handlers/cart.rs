use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

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

fn cart_count(conn: &Connection, user_id: &str) -> Result<i64, HandlerErr> {
    conn.query_row(
        "SELECT COUNT(*) FROM cart_items WHERE user_id = ?",
        [user_id],
        |r| r.get(0),
    )
    .map_err(db_failed)
}

fn cart_add(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let item_id = get_required_str(params, "itemId")?;
    let quantity = params.get("quantity").and_then(|v| v.as_i64()).unwrap_or(1);
    if quantity < 1 {
        return Err(HandlerErr {
            code: "bad_params",
            message: "quantity must be >= 1".to_string(),
            details: Some(json!({ "quantity": quantity })),
        });
    }

    let item_name: Option<String> = conn
        .query_row("SELECT name FROM food_items WHERE id = ?", [&item_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(db_failed)?;
    let Some(item_name) = item_name else {
        return Err(HandlerErr {
            code: "not_found",
            message: "food item not found".to_string(),
            details: Some(json!({ "itemId": item_id })),
        });
    };

    // Re-adding an item grows the existing line instead of duplicating it.
    let existing: Option<String> = conn
        .query_row(
            "SELECT id FROM cart_items WHERE user_id = ? AND food_item_id = ?",
            (&user_id, &item_id),
            |r| r.get(0),
        )
        .optional()
        .map_err(db_failed)?;

    match existing {
        Some(line_id) => {
            conn.execute(
                "UPDATE cart_items SET quantity = quantity + ? WHERE id = ?",
                (quantity, &line_id),
            )
            .map_err(db_failed)?;
        }
        None => {
            let line_id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO cart_items(id, user_id, food_item_id, quantity)
                 VALUES(?, ?, ?, ?)",
                (&line_id, &user_id, &item_id, quantity),
            )
            .map_err(|e| HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "cart_items" })),
            })?;
        }
    }

    Ok(json!({
        "message": format!("Added {} to cart", item_name),
        "cartCount": cart_count(conn, &user_id)?
    }))
}

fn cart_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;

    let mut stmt = conn
        .prepare(
            "SELECT ci.id, fi.id, fi.name, fi.price, ci.quantity
             FROM cart_items ci
             JOIN food_items fi ON fi.id = ci.food_item_id
             WHERE ci.user_id = ?
             ORDER BY fi.name",
        )
        .map_err(db_failed)?;

    let mut total_amount = 0.0f64;
    let lines = stmt
        .query_map([&user_id], |r| {
            let line_id: String = r.get(0)?;
            let item_id: String = r.get(1)?;
            let name: String = r.get(2)?;
            let price: f64 = r.get(3)?;
            let quantity: i64 = r.get(4)?;
            Ok((line_id, item_id, name, price, quantity))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed)?
        .into_iter()
        .map(|(line_id, item_id, name, price, quantity)| {
            let line_total = price * quantity as f64;
            total_amount += line_total;
            json!({
                "cartItemId": line_id,
                "itemId": item_id,
                "name": name,
                "price": price,
                "quantity": quantity,
                "lineTotal": line_total
            })
        })
        .collect::<Vec<_>>();

    Ok(json!({ "items": lines, "totalAmount": total_amount }))
}

fn cart_remove(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;
    let cart_item_id = get_required_str(params, "cartItemId")?;

    let removed = conn
        .execute(
            "DELETE FROM cart_items WHERE id = ? AND user_id = ?",
            (&cart_item_id, &user_id),
        )
        .map_err(db_failed)?;
    if removed == 0 {
        return Err(HandlerErr {
            code: "not_found",
            message: "cart item not found".to_string(),
            details: Some(json!({ "cartItemId": cart_item_id })),
        });
    }

    Ok(json!({ "ok": true, "cartCount": cart_count(conn, &user_id)? }))
}

fn with_db<F>(state: &mut AppState, req: &Request, f: F) -> serde_json::Value
where
    F: FnOnce(&Connection, &serde_json::Value) -> Result<serde_json::Value, HandlerErr>,
{
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cart.add" => Some(with_db(state, req, cart_add)),
        "cart.get" => Some(with_db(state, req, cart_get)),
        "cart.remove" => Some(with_db(state, req, cart_remove)),
        _ => None,
    }
}
