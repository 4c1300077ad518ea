// src/archive.rs

use crate::error::{BotError, Result};
use crate::normalize::parse_issue_date;
use crate::sheet::{COL_ISSUE_DATE, InvoiceSheet};
use std::fs;
use std::path::{Path, PathBuf};
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

pub const MONTHLY_FOLDER: &str = "facturas_mensuales";

/// Today's date in local time, or UTC when the offset cannot be determined.
pub fn today() -> Date {
    OffsetDateTime::now_local()
        .unwrap_or_else(|_| OffsetDateTime::now_utc())
        .date()
}

/// `<output>/<client>/<yyyy>/<mm>/<dd>`
pub fn archive_dir(output_root: &Path, client: &str, date: Date) -> PathBuf {
    output_root
        .join(client)
        .join(format!("{:04}", date.year()))
        .join(format!("{:02}", u8::from(date.month())))
        .join(format!("{:02}", date.day()))
}

/// Replace characters that are not allowed in file names.
fn sanitize(part: &str) -> String {
    part.trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            other => other,
        })
        .collect()
}

/// Rename, falling back to copy and delete across filesystems.
pub fn move_file(src: &Path, dst: &Path) -> Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dst).is_err() {
        fs::copy(src, dst)?;
        fs::remove_file(src)?;
    }
    Ok(())
}

/// Move a posted PDF to `<dir>/<number>_<vendor>_<invoice>.pdf`.
///
/// An existing target is an error and the source stays where it was.
pub fn archive_pdf(src: &Path, dir: &Path, number: &str, vendor: &str, invoice: &str) -> Result<PathBuf> {
    if !src.is_file() {
        return Err(BotError::MissingFile(src.to_path_buf()));
    }
    let target = dir.join(format!(
        "{}_{}_{}.pdf",
        sanitize(number),
        sanitize(vendor),
        sanitize(invoice)
    ));
    if target.exists() {
        return Err(BotError::Row(format!(
            "archived PDF already exists: {}",
            target.display()
        )));
    }
    move_file(src, &target)?;
    info!(from = %src.display(), to = %target.display(), "PDF archived");
    Ok(target)
}

/// Number the application gave the invoice whose archived name mentions `reference`.
///
/// Archived names start with that number followed by `_`. Searches the whole
/// client archive, newest folders first.
pub fn find_referenced_number(client_root: &Path, reference: &str) -> Result<Option<String>> {
    let reference = reference.trim();
    if reference.is_empty() || !client_root.is_dir() {
        return Ok(None);
    }

    let mut pending = vec![client_root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let mut entries: Vec<PathBuf> = fs::read_dir(&dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .collect();
        entries.sort();

        for path in &entries {
            if path.is_dir() {
                // Popped last, so visited first: newest date folder wins.
                pending.push(path.clone());
                continue;
            }
            let is_pdf = path
                .extension()
                .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if is_pdf && name.contains(reference) {
                let number = name.split('_').next().unwrap_or_default().to_string();
                info!(file = %path.display(), number = %number, "Referenced invoice found");
                return Ok(Some(number));
            }
        }
    }
    Ok(None)
}

/// First free path among `path`, `stem_2.ext`, `stem_3.ext`, ...
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("archivo");
    let ext = path.extension().and_then(|s| s.to_str()).unwrap_or("xlsx");
    (2..)
        .map(|n| path.with_file_name(format!("{stem}_{n}.{ext}")))
        .find(|p| !p.exists())
        .unwrap_or_else(|| path.to_path_buf())
}

/// Move a finished spreadsheet into the archive folder as `<client>.xlsx`.
pub fn archive_spreadsheet(sheet_path: &Path, dir: &Path, client: &str) -> Result<PathBuf> {
    let target = unique_path(&dir.join(format!("{}.xlsx", sanitize(client))));
    move_file(sheet_path, &target)?;
    info!(from = %sheet_path.display(), to = %target.display(), "Spreadsheet archived");
    Ok(target)
}

/// Append an archived spreadsheet to `facturas_<yyyy>-<mm>.xlsx` under `monthly_dir`.
///
/// The month comes from the first row's issue date, or today when it cannot be read.
pub fn consolidate_month(archived: &Path, monthly_dir: &Path) -> Result<PathBuf> {
    let sheet = InvoiceSheet::load(archived)?;
    let date = if sheet.has_column(COL_ISSUE_DATE) {
        parse_issue_date(sheet.get(0, COL_ISSUE_DATE)).unwrap_or_else(|e| {
            warn!(error = %e, "Issue date unreadable, filing under the current month");
            today()
        })
    } else {
        warn!("No issue date column, filing under the current month");
        today()
    };

    let target = monthly_dir.join(format!(
        "facturas_{:04}-{:02}.xlsx",
        date.year(),
        u8::from(date.month())
    ));

    let merged = if target.is_file() {
        let mut existing = InvoiceSheet::load(&target)?;
        existing.append_sheet(&sheet);
        info!(file = %target.display(), added = sheet.len(), "Monthly workbook updated");
        existing
    } else {
        fs::create_dir_all(monthly_dir)?;
        let mut fresh = sheet;
        fresh.set_path(&target);
        info!(file = %target.display(), rows = fresh.len(), "Monthly workbook created");
        fresh
    };
    merged.save_as(&target)?;
    Ok(target)
}
