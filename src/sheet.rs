// src/sheet.rs

use crate::error::{BotError, Result};
use calamine::{Data, Reader, open_workbook_auto_from_rs};
use rust_xlsxwriter::Workbook;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const COL_CUFE: &str = "CUFE/CUDE";
pub const COL_PREFIX: &str = "Prefijo";
pub const COL_FOLIO: &str = "Folio";
pub const COL_ISSUE_DATE: &str = "Fecha Emisión";
pub const COL_IVA: &str = "IVA";
pub const COL_PRODUCT_CODE: &str = "codigo de producto";
pub const COL_DOCUMENT_TYPE: &str = "Tipo de documento";
pub const COL_GROUP: &str = "Grupo";
pub const COL_TOTAL: &str = "Total";
pub const COL_ISSUER_NIT: &str = "NIT Emisor";
pub const COL_ISSUER_NAME: &str = "Nombre Emisor";
pub const COL_RECEIVER_NAME: &str = "Nombre Receptor";
pub const COL_RECEIVER_NIT: &str = "NIT Receptor";
pub const COL_COST_CENTER: &str = "centro de costos";

pub const COL_GENERATED: &str = "PDF Generado";
pub const COL_SUCCESS: &str = "Procesamiento Exitoso";
pub const COL_PAYMENT_METHOD: &str = "Forma de Pago";
pub const COL_OUTPUT_NAME: &str = "Nombre PDF";
pub const COL_ERROR: &str = "Mensaje Error";

/// Status columns appended by the posting run.
pub const STATUS_COLUMNS: [&str; 5] = [
    COL_GENERATED,
    COL_SUCCESS,
    COL_PAYMENT_METHOD,
    COL_OUTPUT_NAME,
    COL_ERROR,
];

pub const YES: &str = "Sí";
pub const NO: &str = "No";

/// A single spreadsheet value.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
    Bool(bool),
}

impl Cell {
    pub fn text(s: impl Into<String>) -> Self {
        Cell::Text(s.into())
    }

    /// Blank, whitespace-only, NaN, or the literal text "nan".
    pub fn is_blank(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(s) => {
                let t = s.trim();
                t.is_empty() || t.eq_ignore_ascii_case("nan")
            }
            Cell::Number(n) => n.is_nan(),
            Cell::Bool(_) => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Cell::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&Data> for Cell {
    fn from(d: &Data) -> Self {
        match d {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(e) => Cell::Text(format!("#{e:?}")),
        }
    }
}

/// The whole first worksheet of a workbook, held in memory and rewritten on save.
#[derive(Debug, Clone)]
pub struct InvoiceSheet {
    path: PathBuf,
    headers: Vec<String>,
    rows: Vec<Vec<Cell>>,
}

impl InvoiceSheet {
    #[cfg(test)]
    pub fn new(path: impl Into<PathBuf>, headers: Vec<String>) -> Self {
        Self {
            path: path.into(),
            headers,
            rows: Vec::new(),
        }
    }

    /// Load the first worksheet; row 1 holds the headers.
    ///
    /// The format is detected from the content, not the extension: saving
    /// always writes xlsx, including over an `.xls` input.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(BotError::MissingFile(path.to_path_buf()));
        }
        let bytes = fs::read(path)?;
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes))
            .map_err(|e| BotError::Sheet(format!("{}: {e}", path.display())))?;
        let first = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| BotError::Sheet(format!("{} has no worksheets", path.display())))?;
        let range = workbook.worksheet_range(&first)?;

        let mut iter = range.rows();
        let headers: Vec<String> = iter
            .next()
            .map(|row| row.iter().map(header_text).collect())
            .unwrap_or_default();
        let width = headers.len();
        let rows: Vec<Vec<Cell>> = iter
            .filter(|row| row.iter().any(|c| !matches!(c, Data::Empty)))
            .map(|row| {
                let mut cells: Vec<Cell> = row.iter().take(width).map(Cell::from).collect();
                cells.resize(width, Cell::Empty);
                cells
            })
            .collect();

        if rows.is_empty() {
            return Err(BotError::Sheet(format!("{} is empty", path.display())));
        }
        info!(path = %path.display(), rows = rows.len(), columns = width, "Spreadsheet loaded");
        Ok(Self {
            path: path.to_path_buf(),
            headers,
            rows,
        })
    }

    /// Rewrite the workbook at its original path.
    pub fn save(&self) -> Result<()> {
        self.save_as(&self.path)
    }

    pub fn save_as(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut workbook = Workbook::new();
        let worksheet = workbook.add_worksheet();
        for (col, header) in self.headers.iter().enumerate() {
            worksheet.write_string(0, col as u16, header)?;
        }
        for (r, row) in self.rows.iter().enumerate() {
            let r = (r + 1) as u32;
            for (col, cell) in row.iter().enumerate() {
                let col = col as u16;
                match cell {
                    Cell::Empty => {}
                    Cell::Text(s) => {
                        worksheet.write_string(r, col, s)?;
                    }
                    Cell::Number(n) if n.is_finite() => {
                        worksheet.write_number(r, col, *n)?;
                    }
                    Cell::Number(_) => {}
                    Cell::Bool(b) => {
                        worksheet.write_boolean(r, col, *b)?;
                    }
                }
            }
        }
        workbook.save(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "Spreadsheet saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn set_path(&mut self, path: impl Into<PathBuf>) {
        self.path = path.into();
    }

    #[cfg(test)]
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column(name).is_some()
    }

    /// Append `name` if absent, filling existing rows with `default`.
    pub fn ensure_column(&mut self, name: &str, default: Cell) {
        if self.has_column(name) {
            return;
        }
        self.headers.push(name.to_string());
        for row in &mut self.rows {
            row.push(default.clone());
        }
    }

    /// The Generated marker starts at "No"; the other status columns start empty.
    pub fn ensure_status_columns(&mut self) {
        self.ensure_column(COL_GENERATED, Cell::text(NO));
        for name in &STATUS_COLUMNS[1..] {
            self.ensure_column(name, Cell::Empty);
        }
    }

    pub fn require_columns(&self, names: &[&str]) -> Result<()> {
        let missing: Vec<&str> = names.iter().copied().filter(|n| !self.has_column(n)).collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(BotError::Sheet(format!(
                "{} is missing columns: {}",
                self.path.display(),
                missing.join(", ")
            )))
        }
    }

    pub fn get(&self, row: usize, name: &str) -> &Cell {
        const EMPTY: &Cell = &Cell::Empty;
        self.column(name)
            .and_then(|c| self.rows.get(row).and_then(|r| r.get(c)))
            .unwrap_or(EMPTY)
    }

    /// Set a cell, appending the column first if needed.
    pub fn set(&mut self, row: usize, name: &str, value: Cell) {
        self.ensure_column(name, Cell::Empty);
        if let (Some(c), Some(r)) = (self.column(name), self.rows.get_mut(row)) {
            r[c] = value;
        }
    }

    pub fn set_text(&mut self, row: usize, name: &str, value: impl Into<String>) {
        self.set(row, name, Cell::Text(value.into()));
    }

    #[cfg(test)]
    pub fn push_row(&mut self, cells: Vec<Cell>) {
        let mut cells = cells;
        cells.resize(self.headers.len(), Cell::Empty);
        self.rows.push(cells);
    }

    /// True when the marker column of `row` holds "Sí".
    pub fn is_marked(&self, row: usize, marker: &str) -> bool {
        self.get(row, marker).as_str().is_some_and(|s| s.trim() == YES)
    }

    /// Indices of rows whose marker column is not "Sí", in sheet order.
    pub fn unmarked_rows(&self, marker: &str) -> Vec<usize> {
        (0..self.rows.len()).filter(|&r| !self.is_marked(r, marker)).collect()
    }

    pub fn pending_rows(&self) -> Vec<usize> {
        self.unmarked_rows(COL_GENERATED)
    }

    pub fn all_generated(&self) -> bool {
        self.pending_rows().is_empty()
    }

    /// Keep only rows for which `keep(row_index)` is true.
    pub fn retain_rows(&mut self, mut keep: impl FnMut(&InvoiceSheet, usize) -> bool) {
        let keep_flags: Vec<bool> = (0..self.rows.len()).map(|r| keep(self, r)).collect();
        let mut flags = keep_flags.into_iter();
        self.rows.retain(|_| flags.next().unwrap_or(true));
    }

    /// Append every row of `other`, matching columns by header name.
    pub fn append_sheet(&mut self, other: &InvoiceSheet) {
        for header in &other.headers {
            self.ensure_column(header, Cell::Empty);
        }
        for r in 0..other.len() {
            let cells = self
                .headers
                .iter()
                .map(|h| other.get(r, h).clone())
                .collect();
            self.rows.push(cells);
        }
    }
}

/// Client NIT encoded in an input file name: everything before the first `_`, `(` or `.`.
pub fn client_nit_from_path(path: &Path) -> String {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    name.split(['_', '(', '.']).next().unwrap_or_default().trim().to_string()
}

/// True for `.xlsx` and `.xls` files.
pub fn is_spreadsheet(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx") || e.eq_ignore_ascii_case("xls"))
}

/// Spreadsheets directly under `dir`, sorted by name.
pub fn list_spreadsheets(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(BotError::MissingFile(dir.to_path_buf()));
    }
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| is_spreadsheet(p))
        .collect();
    files.sort();
    Ok(files)
}

fn header_text(d: &Data) -> String {
    match d {
        Data::String(s) => s.trim().to_string(),
        Data::Empty => String::new(),
        other => other.to_string(),
    }
}
