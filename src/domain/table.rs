//! In-memory row table shared by the configuration and state files.
//!
//! Every row of the file is kept, including comments and blank lines. Rows
//! read from disk remember their original text so that untouched rows are
//! written back byte for byte.

use std::collections::BTreeMap;

use super::schema::ID_COLUMN;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKind {
    Data,
    Comment,
    Blank,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    cells: Vec<String>,
    raw: Option<String>,
}

impl Row {
    pub fn new(cells: Vec<String>) -> Self {
        Row { cells, raw: None }
    }

    /// A row as read from disk, with the exact source text.
    pub fn verbatim(cells: Vec<String>, raw: String) -> Self {
        Row {
            cells,
            raw: Some(raw),
        }
    }

    /// An empty source line.
    pub fn empty_line() -> Self {
        Row::verbatim(Vec::new(), String::new())
    }

    pub fn cells(&self) -> &[String] {
        &self.cells
    }

    pub fn raw(&self) -> Option<&str> {
        self.raw.as_deref()
    }

    /// First cell, trimmed. Empty for blank rows.
    pub fn key(&self) -> &str {
        self.cells.first().map(|c| c.trim()).unwrap_or("")
    }

    pub fn kind(&self) -> RowKind {
        if self.key().starts_with('#') {
            RowKind::Comment
        } else if self.cells.iter().all(|c| c.trim().is_empty()) {
            RowKind::Blank
        } else {
            RowKind::Data
        }
    }

    pub fn is_data(&self) -> bool {
        self.kind() == RowKind::Data
    }

    fn set_cell(&mut self, index: usize, value: &str) -> bool {
        if self.cells.len() <= index {
            self.cells.resize(index + 1, String::new());
        }
        if self.cells[index] == value {
            return false;
        }
        self.cells[index] = value.to_string();
        self.raw = None;
        true
    }
}

/// Read-only view of a data row through the table header.
#[derive(Debug, Clone, Copy)]
pub struct RowView<'a> {
    columns: &'a [String],
    row: &'a Row,
}

impl<'a> RowView<'a> {
    pub fn get(&self, column: &str) -> Option<&'a str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.row.cells.get(index).map(|v| v.as_str())
    }

    /// Trimmed value, `None` when the column is absent or the cell empty.
    pub fn non_empty(&self, column: &str) -> Option<&'a str> {
        self.get(column).map(str::trim).filter(|v| !v.is_empty())
    }

    pub fn id(&self) -> &'a str {
        self.row.key()
    }

    /// Values of every named column not listed in `known`.
    pub fn extras(&self, known: &[&str]) -> BTreeMap<String, String> {
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, name)| !name.is_empty() && !known.contains(&name.as_str()))
            .map(|(i, name)| {
                let value = self.row.cells.get(i).cloned().unwrap_or_default();
                (name.clone(), value)
            })
            .collect()
    }
}

/// Mutable access to one row; setting an unknown column appends it to the header.
pub struct RowEditor<'a> {
    columns: &'a mut Vec<String>,
    row: &'a mut Row,
    changed: bool,
}

impl<'a> RowEditor<'a> {
    pub fn get(&self, column: &str) -> Option<&str> {
        let index = self.columns.iter().position(|c| c == column)?;
        self.row.cells.get(index).map(|v| v.as_str())
    }

    pub fn id(&self) -> &str {
        self.row.key()
    }

    pub fn set(&mut self, column: &str, value: &str) {
        let index = match self.columns.iter().position(|c| c == column) {
            Some(i) => i,
            None => {
                self.columns.push(column.to_string());
                self.columns.len() - 1
            }
        };
        if self.row.set_cell(index, value) {
            self.changed = true;
        }
    }

    pub fn changed(&self) -> bool {
        self.changed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    pub fn new(columns: Vec<String>) -> Self {
        Table {
            columns,
            rows: Vec::new(),
        }
    }

    pub fn from_parts(columns: Vec<String>, rows: Vec<Row>) -> Self {
        Table { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    /// Append `name` to the header if absent.
    pub fn ensure_column(&mut self, name: &str) {
        if self.column_index(name).is_none() {
            self.columns.push(name.to_string());
        }
    }

    pub fn view<'a>(&'a self, row: &'a Row) -> RowView<'a> {
        RowView {
            columns: &self.columns,
            row,
        }
    }

    /// Views over data rows, skipping comments and blank rows.
    pub fn data_rows(&self) -> impl Iterator<Item = RowView<'_>> {
        self.rows
            .iter()
            .filter(|r| r.is_data())
            .map(|row| RowView {
                columns: &self.columns,
                row,
            })
    }

    pub fn find(&self, id: &str) -> Option<RowView<'_>> {
        self.data_rows().find(|v| v.id() == id)
    }

    pub fn push(&mut self, row: Row) {
        self.rows.push(row);
    }

    /// Append a data row built from column/value pairs, extending the header as needed.
    pub fn push_record(&mut self, values: &[(&str, String)]) {
        let mut row = Row::new(vec![String::new(); self.columns.len()]);
        let mut editor = RowEditor {
            columns: &mut self.columns,
            row: &mut row,
            changed: false,
        };
        for (column, value) in values {
            editor.set(column, value);
        }
        self.rows.push(row);
    }

    /// Apply `mutator` to every data row whose id satisfies `predicate`.
    /// Returns the number of rows whose contents changed.
    pub fn update<P, M>(&mut self, mut predicate: P, mut mutator: M) -> usize
    where
        P: FnMut(&str) -> bool,
        M: FnMut(&mut RowEditor<'_>),
    {
        let mut changed = 0;
        for row in self.rows.iter_mut() {
            if !row.is_data() || !predicate(row.key()) {
                continue;
            }
            let mut editor = RowEditor {
                columns: &mut self.columns,
                row,
                changed: false,
            };
            mutator(&mut editor);
            if editor.changed() {
                changed += 1;
            }
        }
        changed
    }

    /// Number of data rows carrying `id` in the key column.
    pub fn count_id(&self, id: &str) -> usize {
        self.data_rows().filter(|v| v.id() == id).count()
    }

    pub fn has_id_column(&self) -> bool {
        self.columns.first().map(|c| c.trim()) == Some(ID_COLUMN)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cells(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn sample() -> Table {
        let mut table = Table::new(cells(&["id", "enabled", "note"]));
        table.push(Row::verbatim(cells(&["# header comment"]), "# header comment".into()));
        table.push(Row::new(cells(&["a", "true", "first"])));
        table.push(Row::empty_line());
        table.push(Row::new(cells(&["b", "false", ""])));
        table.push(Row::new(cells(&["", "", ""])));
        table
    }

    #[test]
    fn row_kinds() {
        let table = sample();
        let kinds: Vec<RowKind> = table.rows().iter().map(|r| r.kind()).collect();
        assert_eq!(
            kinds,
            vec![
                RowKind::Comment,
                RowKind::Data,
                RowKind::Blank,
                RowKind::Data,
                RowKind::Blank
            ]
        );
    }

    #[test]
    fn data_rows_skip_comments_and_blanks() {
        let table = sample();
        let ids: Vec<&str> = table.data_rows().map(|v| v.id()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn view_reads_by_column_name() {
        let table = sample();
        let view = table.find("a").unwrap();
        assert_eq!(view.get("enabled"), Some("true"));
        assert_eq!(view.non_empty("note"), Some("first"));
        assert_eq!(table.find("b").unwrap().non_empty("note"), None);
        assert_eq!(view.get("missing"), None);
    }

    #[test]
    fn update_touches_only_matching_rows() {
        let mut table = sample();
        let before = table.rows()[3].clone();
        let changed = table.update(|id| id == "a", |row| row.set("enabled", "false"));
        assert_eq!(changed, 1);
        assert_eq!(table.find("a").unwrap().get("enabled"), Some("false"));
        assert_eq!(table.rows()[3], before);
        assert_eq!(table.len(), 5);
    }

    #[test]
    fn update_appends_unknown_column() {
        let mut table = sample();
        table.update(|id| id == "b", |row| row.set("last_error", "boom"));
        assert_eq!(table.columns(), cells(&["id", "enabled", "note", "last_error"]));
        assert_eq!(table.find("b").unwrap().get("last_error"), Some("boom"));
        assert_eq!(table.find("a").unwrap().get("last_error"), None);
    }

    #[test]
    fn setting_same_value_is_not_a_change() {
        let mut table = sample();
        let changed = table.update(|id| id == "a", |row| row.set("enabled", "true"));
        assert_eq!(changed, 0);
    }

    #[test]
    fn mutation_drops_verbatim_text() {
        let mut table = Table::new(cells(&["id", "enabled"]));
        table.push(Row::verbatim(cells(&["a", "true"]), "a,true".into()));
        table.update(|_| true, |row| row.set("enabled", "false"));
        assert_eq!(table.rows()[0].raw(), None);
    }

    #[test]
    fn comment_rows_never_match_update() {
        let mut table = sample();
        let changed = table.update(|_| true, |row| row.set("note", "x"));
        assert_eq!(changed, 2);
        assert_eq!(table.rows()[0].cells(), cells(&["# header comment"]).as_slice());
    }

    #[test]
    fn push_record_fills_named_columns() {
        let mut table = Table::new(cells(&["id", "triggered"]));
        table.push_record(&[("id", "x".into()), ("order_id", "O-1".into())]);
        let view = table.find("x").unwrap();
        assert_eq!(view.get("triggered"), Some(""));
        assert_eq!(view.get("order_id"), Some("O-1"));
    }

    #[test]
    fn extras_exclude_known_columns() {
        let table = sample();
        let extras = table.find("a").unwrap().extras(&["id", "enabled"]);
        assert_eq!(extras.get("note").map(String::as_str), Some("first"));
        assert_eq!(extras.len(), 1);
    }
}
