use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::media;
use crate::sheet::{Annotated, Sheet};
use rusqlite::OptionalExtension;
use serde_json::json;
use std::path::Path;
use uuid::Uuid;

/// Exact header set a menu sheet must carry, in any column order.
const EXPECTED_COLUMNS: [&str; 7] = [
    "Name",
    "Category",
    "Price",
    "Description",
    "Is_Vegetarian",
    "Is_Vegan",
    "Image_Path",
];

/// Image_Path is part of the schema but carries no type contract and is
/// never applied: imported items keep the default image.
#[derive(Clone, Copy)]
enum FieldType {
    Str,
    Number,
    Bool,
}

impl FieldType {
    fn label(self) -> &'static str {
        match self {
            FieldType::Str => "str",
            FieldType::Number => "int or float",
            FieldType::Bool => "bool",
        }
    }
}

/// Column positions as they appear in the uploaded file. Highlighting and
/// value reads both go through these, so a reordered sheet still marks the
/// right cells.
struct Columns {
    name: usize,
    category: usize,
    price: usize,
    description: usize,
    is_vegetarian: usize,
    is_vegan: usize,
}

fn resolve_columns(sheet: &Sheet) -> Option<Columns> {
    Some(Columns {
        name: sheet.column_index("Name")?,
        category: sheet.column_index("Category")?,
        price: sheet.column_index("Price")?,
        description: sheet.column_index("Description")?,
        is_vegetarian: sheet.column_index("Is_Vegetarian")?,
        is_vegan: sheet.column_index("Is_Vegan")?,
    })
}

fn field_checks(cols: &Columns) -> [(&'static str, FieldType, usize); 6] {
    [
        ("Name", FieldType::Str, cols.name),
        ("Category", FieldType::Str, cols.category),
        ("Price", FieldType::Number, cols.price),
        ("Description", FieldType::Str, cols.description),
        ("Is_Vegetarian", FieldType::Bool, cols.is_vegetarian),
        ("Is_Vegan", FieldType::Bool, cols.is_vegan),
    ]
}

fn parse_flag(s: &str) -> Option<bool> {
    match s.to_ascii_lowercase().as_str() {
        "true" => Some(true),
        "false" => Some(false),
        _ => None,
    }
}

/// One validation result per field: presence first, then the type contract.
/// Cells arrive as text, so string fields can only fail presence.
fn check_field(value: &str, kind: FieldType, field: &str) -> Option<String> {
    let v = value.trim();
    if v.is_empty() {
        return Some(format!("{} is missing", field));
    }
    let conforms = match kind {
        FieldType::Str => true,
        FieldType::Number => v.parse::<f64>().is_ok(),
        FieldType::Bool => parse_flag(v).is_some(),
    };
    if conforms {
        None
    } else {
        Some(format!("{} must be {}", field, kind.label()))
    }
}

fn schema_diff(headers: &[String]) -> (Vec<String>, Vec<String>) {
    let missing: Vec<String> = EXPECTED_COLUMNS
        .iter()
        .filter(|c| !headers.iter().any(|h| h == *c))
        .map(|c| c.to_string())
        .collect();
    let extra: Vec<String> = headers
        .iter()
        .filter(|h| !EXPECTED_COLUMNS.contains(&h.as_str()))
        .cloned()
        .collect();
    (missing, extra)
}

fn schema_error_message(missing: &[String], extra: &[String]) -> String {
    format!(
        "incorrect file format; missing columns: {}; unexpected columns: {}",
        missing.join(", "),
        extra.join(", ")
    )
}

fn handle_menu_import(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(workspace) = state.workspace.clone() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match req.params.get("path").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing path", None),
    };

    let sheet = match Sheet::load(Path::new(&path)) {
        Ok(s) => s,
        Err(e) => {
            return err(
                &req.id,
                "parse_failed",
                format!("could not read menu sheet: {}", e),
                Some(json!({ "path": path })),
            )
        }
    };

    // Zero data rows is its own outcome, reported before schema checking.
    if sheet.rows.is_empty() {
        return err(
            &req.id,
            "empty_file",
            "the uploaded file is empty",
            Some(json!({ "path": path })),
        );
    }

    let (missing, extra) = schema_diff(&sheet.headers);
    if !missing.is_empty() || !extra.is_empty() {
        // Hard stop: highlight the header row and reject the whole import
        // before any row runs.
        let mut annotated = Annotated::new(&sheet);
        for (i, h) in sheet.headers.iter().enumerate() {
            if extra.iter().any(|e| e == h) {
                annotated.mark_header(i);
            }
        }
        for name in &missing {
            annotated.push_missing_header(name);
        }
        let error_file = media::error_sheet_path(&workspace);
        if let Err(e) = annotated.save(&error_file) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": error_file.to_string_lossy() })),
            );
        }
        return err(
            &req.id,
            "schema_mismatch",
            schema_error_message(&missing, &extra),
            Some(json!({
                "missing": missing,
                "extra": extra,
                "errorFile": error_file.to_string_lossy()
            })),
        );
    }

    let Some(cols) = resolve_columns(&sheet) else {
        return err(&req.id, "schema_mismatch", "expected columns not present", None);
    };

    let mut annotated = Annotated::new(&sheet);
    let mut inserted: Vec<String> = Vec::new();
    let mut row_errors: Vec<String> = Vec::new();

    for (idx, _) in sheet.rows.iter().enumerate() {
        let row_no = idx + 1;
        let mut errors: Vec<String> = Vec::new();

        // Every failing field is recorded and marked; no short-circuit
        // within the row, so the annotated copy shows all offending cells.
        for (field, kind, c) in field_checks(&cols) {
            if let Some(msg) = check_field(sheet.cell(idx, c), kind, field) {
                errors.push(msg);
                annotated.mark_cell(idx, c);
            }
        }

        // Categories named in the sheet always materialize, even when the
        // row is later rejected. Items do not.
        let category_value = sheet.cell(idx, cols.category).trim().to_string();
        let mut category_id: Option<String> = None;
        if !category_value.is_empty() {
            match db::get_or_create_category(conn, &category_value) {
                Ok(id) => category_id = Some(id),
                Err(e) => {
                    return err(
                        &req.id,
                        "import_failed",
                        format!("error processing file: {}", e),
                        Some(json!({ "row": row_no })),
                    )
                }
            }
        }

        if errors.is_empty() {
            let Some(category_id) = category_id else {
                continue;
            };
            let name = sheet.cell(idx, cols.name).trim().to_string();
            let is_vegetarian =
                parse_flag(sheet.cell(idx, cols.is_vegetarian).trim()).unwrap_or(false);
            let is_vegan = parse_flag(sheet.cell(idx, cols.is_vegan).trim()).unwrap_or(false);

            let duplicate =
                match db::food_item_exists(conn, &name, &category_id, is_vegan, is_vegetarian) {
                    Ok(v) => v,
                    Err(e) => {
                        return err(
                            &req.id,
                            "import_failed",
                            format!("error processing file: {}", e),
                            Some(json!({ "row": row_no })),
                        )
                    }
                };
            if duplicate {
                errors.push(format!("Duplicate entry: {} in {}", name, category_value));
                annotated.mark_cell(idx, cols.name);
            } else {
                let item_id = Uuid::new_v4().to_string();
                let price = sheet
                    .cell(idx, cols.price)
                    .trim()
                    .parse::<f64>()
                    .unwrap_or(0.0);
                let description = sheet.cell(idx, cols.description).trim().to_string();
                if let Err(e) = conn.execute(
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
                ) {
                    // No rollback of earlier rows: partial application is
                    // the intended failure mode.
                    return err(
                        &req.id,
                        "import_failed",
                        format!("error processing file: {}", e),
                        Some(json!({ "row": row_no })),
                    );
                }
                inserted.push(name);
            }
        }

        if !errors.is_empty() {
            row_errors.push(format!("Row {}: {}", row_no, errors.join(", ")));
        }
    }

    if !row_errors.is_empty() {
        let error_file = media::error_sheet_path(&workspace);
        if let Err(e) = annotated.save(&error_file) {
            return err(
                &req.id,
                "io_failed",
                e.to_string(),
                Some(json!({ "path": error_file.to_string_lossy() })),
            );
        }
        return ok(
            &req.id,
            json!({
                "outcome": "completed_with_errors",
                "inserted": inserted,
                "insertedCount": inserted.len(),
                "rowErrors": row_errors,
                "errorFile": error_file.to_string_lossy()
            }),
        );
    }

    if !inserted.is_empty() {
        let count = inserted.len();
        return ok(
            &req.id,
            json!({
                "outcome": "inserted",
                "inserted": inserted,
                "insertedCount": count
            }),
        );
    }

    ok(
        &req.id,
        json!({
            "outcome": "nothing_inserted",
            "inserted": [],
            "insertedCount": 0
        }),
    )
}

/// Dry run of the import: same parsing, schema, type, and duplicate checks,
/// but nothing is written — no categories, no items, no annotated copy.
fn handle_menu_import_preview(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let path = match req.params.get("path").and_then(|v| v.as_str()) {
        Some(v) if !v.trim().is_empty() => v.trim().to_string(),
        _ => return err(&req.id, "bad_params", "missing path", None),
    };

    let sheet = match Sheet::load(Path::new(&path)) {
        Ok(s) => s,
        Err(e) => {
            return err(
                &req.id,
                "parse_failed",
                format!("could not read menu sheet: {}", e),
                Some(json!({ "path": path })),
            )
        }
    };
    if sheet.rows.is_empty() {
        return err(
            &req.id,
            "empty_file",
            "the uploaded file is empty",
            Some(json!({ "path": path })),
        );
    }

    let (missing, extra) = schema_diff(&sheet.headers);
    if !missing.is_empty() || !extra.is_empty() {
        return err(
            &req.id,
            "schema_mismatch",
            schema_error_message(&missing, &extra),
            Some(json!({ "missing": missing, "extra": extra })),
        );
    }
    let Some(cols) = resolve_columns(&sheet) else {
        return err(&req.id, "schema_mismatch", "expected columns not present", None);
    };

    let mut would_insert = 0usize;
    let mut rows = Vec::new();
    for (idx, _) in sheet.rows.iter().enumerate() {
        let row_no = idx + 1;
        let mut errors: Vec<String> = Vec::new();
        for (field, kind, c) in field_checks(&cols) {
            if let Some(msg) = check_field(sheet.cell(idx, c), kind, field) {
                errors.push(msg);
            }
        }

        if errors.is_empty() {
            let name = sheet.cell(idx, cols.name).trim();
            let category = sheet.cell(idx, cols.category).trim();
            let is_vegetarian =
                parse_flag(sheet.cell(idx, cols.is_vegetarian).trim()).unwrap_or(false);
            let is_vegan = parse_flag(sheet.cell(idx, cols.is_vegan).trim()).unwrap_or(false);
            let duplicate: Option<i64> = match conn
                .query_row(
                    "SELECT 1 FROM food_items fi
                     JOIN categories c ON c.id = fi.category_id
                     WHERE fi.name = ? AND c.name = ? AND fi.is_vegan = ? AND fi.is_vegetarian = ?",
                    (name, category, is_vegan as i64, is_vegetarian as i64),
                    |r| r.get(0),
                )
                .optional()
            {
                Ok(v) => v,
                Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
            };
            if duplicate.is_some() {
                errors.push(format!("Duplicate entry: {} in {}", name, category));
            }
        }

        if errors.is_empty() {
            would_insert += 1;
        }
        rows.push(json!({
            "row": row_no,
            "wouldInsert": errors.is_empty(),
            "errors": errors
        }));
    }

    let rejected = rows.len() - would_insert;
    ok(
        &req.id,
        json!({
            "rows": rows,
            "rowsTotal": sheet.rows.len(),
            "wouldInsert": would_insert,
            "wouldReject": rejected
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "menu.import" => Some(handle_menu_import(state, req)),
        "menu.importPreview" => Some(handle_menu_import_preview(state, req)),
        _ => None,
    }
}
