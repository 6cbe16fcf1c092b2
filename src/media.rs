use std::path::{Path, PathBuf};

/// Sentinel image applied when staff provide none; bulk import always leaves
/// items on this default even though the sheet reserves an Image_Path column.
pub const DEFAULT_ITEM_IMAGE: &str = "food_item_pics/food_default.png";

/// Well-known name of the annotated import error copy. One per workspace,
/// overwritten on every import attempt (single writer at a time).
pub const ERROR_SHEET_NAME: &str = "menu_errors.csv";

pub fn media_dir(workspace: &Path) -> PathBuf {
    workspace.join("media")
}

pub fn error_sheet_path(workspace: &Path) -> PathBuf {
    media_dir(workspace).join(ERROR_SHEET_NAME)
}

/// Copy a staff-supplied image into the media tree as
/// `food_item_pics/<id>_<name>.<ext>`, returning the stored relative path.
pub fn place_item_image(
    workspace: &Path,
    item_id: &str,
    item_name: &str,
    source: &Path,
) -> anyhow::Result<String> {
    let ext = source
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("png");
    let rel = format!("food_item_pics/{}_{}.{}", item_id, item_name, ext);
    let dest = media_dir(workspace).join(&rel);
    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::copy(source, &dest)?;
    Ok(rel)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    #[test]
    fn placed_image_is_renamed_by_id_and_name() {
        let workspace = std::env::temp_dir().join(format!(
            "menud-media-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&workspace).expect("create workspace");
        let source = workspace.join("upload.jpg");
        std::fs::write(&source, b"jpeg bytes").expect("write source");

        let rel = place_item_image(&workspace, "abc123", "Pizza", &source).expect("place");
        assert_eq!(rel, "food_item_pics/abc123_Pizza.jpg");
        assert!(media_dir(&workspace).join(&rel).is_file());
    }
}
