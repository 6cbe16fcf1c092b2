use chrono::{Duration, Utc};
use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_menud");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn menud");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({ "id": id, "method": method, "params": params });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn error_code(resp: &serde_json::Value) -> &str {
    resp.get("error")
        .and_then(|e| e.get("code"))
        .and_then(|v| v.as_str())
        .unwrap_or("")
}

/// Seed one category with two items; returns their ids.
fn seed_menu(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
) -> (String, String) {
    let cat = request(
        stdin,
        reader,
        "seed-cat",
        "categories.create",
        json!({ "name": "Mains" }),
    );
    let category_id = cat["result"]["categoryId"]
        .as_str()
        .expect("categoryId")
        .to_string();

    let pizza = request(
        stdin,
        reader,
        "seed-pizza",
        "items.create",
        json!({
            "name": "Pizza",
            "categoryId": category_id,
            "price": 9.5,
            "description": "Cheese pizza",
            "isVegetarian": true,
            "isVegan": false
        }),
    );
    let burger = request(
        stdin,
        reader,
        "seed-burger",
        "items.create",
        json!({
            "name": "Burger",
            "categoryId": category_id,
            "price": 8.0,
            "description": "Beef burger",
            "isVegetarian": false,
            "isVegan": false
        }),
    );
    (
        pizza["result"]["itemId"].as_str().expect("itemId").to_string(),
        burger["result"]["itemId"].as_str().expect("itemId").to_string(),
    )
}

#[test]
fn cart_lines_accumulate_and_total_follows_quantity() {
    let workspace = temp_dir("menud-cart");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (pizza_id, burger_id) = seed_menu(&mut stdin, &mut reader);

    // Re-adding the same item grows the line instead of duplicating it.
    let first = request(
        &mut stdin,
        &mut reader,
        "2",
        "cart.add",
        json!({ "userId": "alice", "itemId": pizza_id, "quantity": 1 }),
    );
    assert_eq!(first["result"]["cartCount"], json!(1));
    assert_eq!(first["result"]["message"], json!("Added Pizza to cart"));
    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "cart.add",
        json!({ "userId": "alice", "itemId": pizza_id, "quantity": 2 }),
    );
    let added = request(
        &mut stdin,
        &mut reader,
        "4",
        "cart.add",
        json!({ "userId": "alice", "itemId": burger_id }),
    );
    assert_eq!(added["result"]["cartCount"], json!(2));

    let cart = request(
        &mut stdin,
        &mut reader,
        "5",
        "cart.get",
        json!({ "userId": "alice" }),
    );
    let lines = cart["result"]["items"].as_array().expect("cart lines");
    assert_eq!(lines.len(), 2);
    let pizza_line = lines
        .iter()
        .find(|l| l["name"] == json!("Pizza"))
        .expect("pizza line");
    assert_eq!(pizza_line["quantity"], json!(3));
    assert_eq!(pizza_line["lineTotal"], json!(28.5));
    assert_eq!(cart["result"]["totalAmount"], json!(36.5));

    // Carts are per user.
    let other = request(
        &mut stdin,
        &mut reader,
        "6",
        "cart.get",
        json!({ "userId": "bob" }),
    );
    assert_eq!(other["result"]["totalAmount"], json!(0.0));

    let removed = request(
        &mut stdin,
        &mut reader,
        "7",
        "cart.remove",
        json!({
            "userId": "alice",
            "cartItemId": pizza_line["cartItemId"].as_str().expect("line id")
        }),
    );
    assert_eq!(removed["result"]["cartCount"], json!(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn placing_an_order_snapshots_the_cart_and_clears_it() {
    let workspace = temp_dir("menud-order");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (pizza_id, burger_id) = seed_menu(&mut stdin, &mut reader);

    // An empty cart cannot be ordered.
    let empty = request(
        &mut stdin,
        &mut reader,
        "2",
        "orders.place",
        json!({ "userId": "alice" }),
    );
    assert_eq!(error_code(&empty), "cart_empty");

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "cart.add",
        json!({ "userId": "alice", "itemId": pizza_id, "quantity": 2 }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "4",
        "cart.add",
        json!({ "userId": "alice", "itemId": burger_id, "quantity": 1 }),
    );

    let placed = request(
        &mut stdin,
        &mut reader,
        "5",
        "orders.place",
        json!({ "userId": "alice" }),
    );
    assert_eq!(placed["result"]["status"], json!("Completed"));
    assert_eq!(placed["result"]["totalAmount"], json!(27.0));
    assert_eq!(placed["result"]["lineCount"], json!(2));

    let cart = request(
        &mut stdin,
        &mut reader,
        "6",
        "cart.get",
        json!({ "userId": "alice" }),
    );
    assert_eq!(
        cart["result"]["items"].as_array().map(|a| a.len()),
        Some(0)
    );

    let history = request(
        &mut stdin,
        &mut reader,
        "7",
        "orders.history",
        json!({ "userId": "alice" }),
    );
    let orders = history["result"]["orders"].as_array().expect("orders");
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0]["status"], json!("Completed"));
    let lines = orders[0]["lines"].as_array().expect("order lines");
    assert_eq!(lines.len(), 2);
    assert_eq!(history["result"]["statuses"], json!(["Completed"]));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn cancellation_is_allowed_only_inside_the_grace_window() {
    let workspace = temp_dir("menud-cancel");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let (pizza_id, _) = seed_menu(&mut stdin, &mut reader);

    // Nothing to cancel yet.
    let none = request(
        &mut stdin,
        &mut reader,
        "2",
        "orders.cancel",
        json!({ "userId": "alice" }),
    );
    assert_eq!(error_code(&none), "not_found");

    let _ = request(
        &mut stdin,
        &mut reader,
        "3",
        "cart.add",
        json!({ "userId": "alice", "itemId": pizza_id }),
    );
    let placed = request(
        &mut stdin,
        &mut reader,
        "4",
        "orders.place",
        json!({ "userId": "alice" }),
    );
    let order_id = placed["result"]["orderId"].as_str().expect("orderId");

    // Fresh order: inside the window.
    let cancelled = request(
        &mut stdin,
        &mut reader,
        "5",
        "orders.cancel",
        json!({ "userId": "alice" }),
    );
    assert_eq!(cancelled["result"]["orderId"], json!(order_id));
    assert_eq!(cancelled["result"]["status"], json!("Cancelled"));

    // Age the order past the window straight in the store, then retry.
    let _ = request(
        &mut stdin,
        &mut reader,
        "6",
        "cart.add",
        json!({ "userId": "alice", "itemId": pizza_id }),
    );
    let _ = request(
        &mut stdin,
        &mut reader,
        "7",
        "orders.place",
        json!({ "userId": "alice" }),
    );
    let conn = rusqlite::Connection::open(workspace.join("menu.sqlite3")).expect("open db");
    let stale = (Utc::now() - Duration::seconds(600)).to_rfc3339();
    conn.execute("UPDATE orders SET created_at = ?", [&stale])
        .expect("backdate orders");
    drop(conn);

    let expired = request(
        &mut stdin,
        &mut reader,
        "8",
        "orders.cancel",
        json!({ "userId": "alice" }),
    );
    assert_eq!(error_code(&expired), "cancel_window_expired");

    let history = request(
        &mut stdin,
        &mut reader,
        "9",
        "orders.history",
        json!({ "userId": "alice" }),
    );
    let statuses = history["result"]["statuses"].as_array().expect("statuses");
    assert!(statuses.contains(&json!("Completed")));
    assert!(statuses.contains(&json!("Cancelled")));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
