use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Orders can be cancelled for this long after placement.
const CANCEL_GRACE_SECONDS: i64 = 120;

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

fn orders_place(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;

    let mut stmt = conn
        .prepare(
            "SELECT ci.food_item_id, ci.quantity, fi.price
             FROM cart_items ci
             JOIN food_items fi ON fi.id = ci.food_item_id
             WHERE ci.user_id = ?",
        )
        .map_err(db_failed)?;
    let lines = stmt
        .query_map([&user_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed)?;

    if lines.is_empty() {
        return Err(HandlerErr {
            code: "cart_empty",
            message: "your cart is empty".to_string(),
            details: None,
        });
    }

    let total_amount: f64 = lines.iter().map(|(_, q, p)| *q as f64 * p).sum();
    let order_id = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    if let Err(e) = tx.execute(
        "INSERT INTO orders(id, user_id, total_amount, created_at, status)
         VALUES(?, ?, ?, ?, 'Completed')",
        (&order_id, &user_id, total_amount, &created_at),
    ) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_insert_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "orders" })),
        });
    }

    // Snapshot the cart into immutable history lines before clearing it.
    for (food_item_id, quantity, _) in &lines {
        let line_id = Uuid::new_v4().to_string();
        if let Err(e) = tx.execute(
            "INSERT INTO order_history(id, order_id, food_item_id, quantity)
             VALUES(?, ?, ?, ?)",
            (&line_id, &order_id, food_item_id, quantity),
        ) {
            let _ = tx.rollback();
            return Err(HandlerErr {
                code: "db_insert_failed",
                message: e.to_string(),
                details: Some(json!({ "table": "order_history" })),
            });
        }
    }

    if let Err(e) = tx.execute("DELETE FROM cart_items WHERE user_id = ?", [&user_id]) {
        let _ = tx.rollback();
        return Err(HandlerErr {
            code: "db_delete_failed",
            message: e.to_string(),
            details: Some(json!({ "table": "cart_items" })),
        });
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;

    Ok(json!({
        "orderId": order_id,
        "totalAmount": total_amount,
        "status": "Completed",
        "lineCount": lines.len()
    }))
}

fn orders_cancel(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;

    let latest: Option<(String, String)> = conn
        .query_row(
            "SELECT id, created_at FROM orders
             WHERE user_id = ?
             ORDER BY created_at DESC
             LIMIT 1",
            [&user_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(db_failed)?;
    let Some((order_id, created_at)) = latest else {
        return Err(HandlerErr {
            code: "not_found",
            message: "no recent order found to cancel".to_string(),
            details: None,
        });
    };

    let created = DateTime::parse_from_rfc3339(&created_at).map_err(|e| HandlerErr {
        code: "db_query_failed",
        message: format!("bad created_at on order {}: {}", order_id, e),
        details: None,
    })?;
    let elapsed = Utc::now().signed_duration_since(created.with_timezone(&Utc));
    if elapsed.num_seconds() > CANCEL_GRACE_SECONDS {
        return Err(HandlerErr {
            code: "cancel_window_expired",
            message: "order cancellation time has expired".to_string(),
            details: Some(json!({
                "orderId": order_id,
                "elapsedSeconds": elapsed.num_seconds(),
                "graceSeconds": CANCEL_GRACE_SECONDS
            })),
        });
    }

    conn.execute(
        "UPDATE orders SET status = 'Cancelled' WHERE id = ?",
        [&order_id],
    )
    .map_err(db_failed)?;

    Ok(json!({ "orderId": order_id, "status": "Cancelled" }))
}

fn orders_history(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let user_id = get_required_str(params, "userId")?;

    let mut stmt = conn
        .prepare(
            "SELECT id, total_amount, created_at, status
             FROM orders
             WHERE user_id = ?
             ORDER BY created_at DESC",
        )
        .map_err(db_failed)?;
    let orders = stmt
        .query_map([&user_id], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, f64>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(db_failed)?;

    let mut line_stmt = conn
        .prepare(
            "SELECT oh.food_item_id, fi.name, oh.quantity
             FROM order_history oh
             JOIN food_items fi ON fi.id = oh.food_item_id
             WHERE oh.order_id = ?
             ORDER BY fi.name",
        )
        .map_err(db_failed)?;

    let mut statuses: Vec<String> = Vec::new();
    let mut out = Vec::new();
    for (order_id, total_amount, created_at, status) in orders {
        let lines = line_stmt
            .query_map([&order_id], |r| {
                let item_id: String = r.get(0)?;
                let name: String = r.get(1)?;
                let quantity: i64 = r.get(2)?;
                Ok(json!({ "itemId": item_id, "name": name, "quantity": quantity }))
            })
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .map_err(db_failed)?;
        if !statuses.contains(&status) {
            statuses.push(status.clone());
        }
        out.push(json!({
            "orderId": order_id,
            "totalAmount": total_amount,
            "createdAt": created_at,
            "status": status,
            "lines": lines
        }));
    }

    Ok(json!({ "orders": out, "statuses": statuses }))
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
        "orders.place" => Some(with_db(state, req, orders_place)),
        "orders.cancel" => Some(with_db(state, req, orders_cancel)),
        "orders.history" => Some(with_db(state, req, orders_history)),
        _ => None,
    }
}
