use std::collections::HashSet;
use std::path::Path;

/// An uploaded menu sheet: the header row as it literally appears in the
/// file, plus every data row padded to the header width. Column order is
/// whatever the file uses; lookups go through `column_index`.
pub struct Sheet {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn load(path: &Path) -> anyhow::Result<Sheet> {
        let mut reader = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let width = headers.len();
        let mut rows: Vec<Vec<String>> = Vec::new();
        for record in reader.records() {
            let record = record?;
            let mut row: Vec<String> = record.iter().map(|c| c.to_string()).collect();
            if row.len() < width {
                row.resize(width, String::new());
            }
            rows.push(row);
        }

        Ok(Sheet { headers, rows })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

const MARK_OPEN: &str = ">>";
const MARK_CLOSE: &str = "<<";

/// A copy of the uploaded sheet that collects cell marks and renders them on
/// save by wrapping the offending cell's original text in `>>`/`<<`. Header
/// marks land on the file's own column positions; expected columns the file
/// lacks are appended as marked header cells so the uploader can see them.
pub struct Annotated {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    marked_headers: HashSet<usize>,
    marked_cells: HashSet<(usize, usize)>,
}

impl Annotated {
    pub fn new(sheet: &Sheet) -> Annotated {
        Annotated {
            headers: sheet.headers.clone(),
            rows: sheet.rows.clone(),
            marked_headers: HashSet::new(),
            marked_cells: HashSet::new(),
        }
    }

    pub fn mark_header(&mut self, col: usize) {
        if col < self.headers.len() {
            self.marked_headers.insert(col);
        }
    }

    /// Append a header cell for an expected column the file does not carry,
    /// already marked. Data rows gain an empty cell to stay rectangular.
    pub fn push_missing_header(&mut self, name: &str) {
        self.headers.push(name.to_string());
        self.marked_headers.insert(self.headers.len() - 1);
        for row in &mut self.rows {
            row.push(String::new());
        }
    }

    pub fn mark_cell(&mut self, row: usize, col: usize) {
        if row < self.rows.len() && col < self.rows[row].len() {
            self.marked_cells.insert((row, col));
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut writer = csv::Writer::from_path(path)?;

        let header_row: Vec<String> = self
            .headers
            .iter()
            .enumerate()
            .map(|(i, h)| render(h, self.marked_headers.contains(&i)))
            .collect();
        writer.write_record(&header_row)?;

        for (r, row) in self.rows.iter().enumerate() {
            let out: Vec<String> = row
                .iter()
                .enumerate()
                .map(|(c, cell)| render(cell, self.marked_cells.contains(&(r, c))))
                .collect();
            writer.write_record(&out)?;
        }

        writer.flush()?;
        Ok(())
    }
}

fn render(cell: &str, marked: bool) -> String {
    if marked {
        format!("{}{}{}", MARK_OPEN, cell, MARK_CLOSE)
    } else {
        cell.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn temp_file(name: &str, contents: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "menud-sheet-{}",
            SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .expect("clock")
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        let p = dir.join(name);
        std::fs::write(&p, contents).expect("write temp file");
        p
    }

    #[test]
    fn load_pads_short_rows_to_header_width() {
        let p = temp_file("menu.csv", "Name,Category,Price\nPizza,Mains\n");
        let sheet = Sheet::load(&p).expect("load");
        assert_eq!(sheet.headers, vec!["Name", "Category", "Price"]);
        assert_eq!(sheet.rows.len(), 1);
        assert_eq!(sheet.rows[0], vec!["Pizza", "Mains", ""]);
        assert_eq!(sheet.cell(0, 2), "");
    }

    #[test]
    fn column_index_uses_file_order() {
        let p = temp_file("menu.csv", "Price,Name\n9.5,Pizza\n");
        let sheet = Sheet::load(&p).expect("load");
        assert_eq!(sheet.column_index("Name"), Some(1));
        assert_eq!(sheet.column_index("Price"), Some(0));
        assert_eq!(sheet.column_index("Category"), None);
    }

    #[test]
    fn save_wraps_marked_cells_and_preserves_the_rest() {
        let p = temp_file("menu.csv", "Name,Price\nPizza,abc\nSoup,4.0\n");
        let sheet = Sheet::load(&p).expect("load");

        let mut annotated = Annotated::new(&sheet);
        annotated.mark_cell(0, 1);
        annotated.push_missing_header("Category");

        let out = p.with_file_name("menu_errors.csv");
        annotated.save(&out).expect("save");

        let text = std::fs::read_to_string(&out).expect("read back");
        assert!(text.contains(">>abc<<"));
        assert!(text.contains(">>Category<<"));
        assert!(text.contains("Soup,4.0"));
    }

    #[test]
    fn marks_out_of_range_are_ignored() {
        let p = temp_file("menu.csv", "Name\nPizza\n");
        let sheet = Sheet::load(&p).expect("load");
        let mut annotated = Annotated::new(&sheet);
        annotated.mark_cell(5, 0);
        annotated.mark_header(9);
        let out = p.with_file_name("menu_errors.csv");
        annotated.save(&out).expect("save");
        let text = std::fs::read_to_string(&out).expect("read back");
        assert!(!text.contains(">>"));
    }
}
