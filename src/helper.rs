// src/helper.rs

use crate::error::{BotError, Result};
use crate::heuristics::ExtractedPdfRecord;
use crate::pdf_text;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{info, warn};

pub const ROUTES_FILE: &str = "pdf_routes.json";
pub const EXTRACTED_FILE: &str = "datos_extraidos.json";

/// Anything that can turn an invoice PDF into its extracted fields.
pub trait PdfFieldSource {
    fn extract(&self, pdf: &Path) -> Result<ExtractedPdfRecord>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PdfRoutes {
    path_pdf: RoutePaths,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum RoutePaths {
    One(PathBuf),
    Many(Vec<PathBuf>),
}

impl RoutePaths {
    fn into_vec(self) -> Vec<PathBuf> {
        match self {
            RoutePaths::One(p) => vec![p],
            RoutePaths::Many(v) => v,
        }
    }
}

fn write_routes(config_dir: &Path, pdf: &Path) -> Result<()> {
    let routes = PdfRoutes {
        path_pdf: RoutePaths::One(pdf.to_path_buf()),
    };
    fs::write(config_dir.join(ROUTES_FILE), serde_json::to_string_pretty(&routes)?)?;
    Ok(())
}

fn read_first_record(config_dir: &Path, pdf: &Path) -> Result<ExtractedPdfRecord> {
    let path = config_dir.join(EXTRACTED_FILE);
    let content = fs::read_to_string(&path)?;
    let records: Vec<ExtractedPdfRecord> = serde_json::from_str(&content)?;
    records
        .into_iter()
        .next()
        .ok_or_else(|| BotError::Helper(format!("no fields extracted from {}", pdf.display())))
}

/// Runs this same executable's `extract-pdf` subcommand as a child process,
/// exchanging paths and results through two JSON files in the config folder.
pub struct ProcessHelper {
    program: PathBuf,
    base_dir: PathBuf,
    config_dir: PathBuf,
}

impl ProcessHelper {
    pub fn new(program: impl Into<PathBuf>, base_dir: impl Into<PathBuf>, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            base_dir: base_dir.into(),
            config_dir: config_dir.into(),
        }
    }

    pub fn current_exe(base_dir: &Path, config_dir: &Path) -> Result<Self> {
        Ok(Self::new(std::env::current_exe()?, base_dir, config_dir))
    }
}

impl PdfFieldSource for ProcessHelper {
    fn extract(&self, pdf: &Path) -> Result<ExtractedPdfRecord> {
        write_routes(&self.config_dir, pdf)?;
        // A stale result must never be read back for this PDF.
        let _ = fs::remove_file(self.config_dir.join(EXTRACTED_FILE));

        let output = Command::new(&self.program)
            .arg("--base-dir")
            .arg(&self.base_dir)
            .arg("extract-pdf")
            .output()
            .map_err(|e| BotError::Helper(format!("cannot run {}: {e}", self.program.display())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BotError::Helper(format!(
                "exit status {}: {}",
                output.status,
                stderr.trim()
            )));
        }
        info!(pdf = %pdf.display(), "Extraction helper finished");
        read_first_record(&self.config_dir, pdf)
    }
}

/// Extracts in the current process, for the retrieval stage and tests.
pub struct InProcess;

impl PdfFieldSource for InProcess {
    fn extract(&self, pdf: &Path) -> Result<ExtractedPdfRecord> {
        pdf_text::extract_record(pdf)
    }
}

/// Body of the `extract-pdf` subcommand. Returns how many PDFs were extracted.
pub fn run_extract_command(config_dir: &Path) -> Result<usize> {
    let routes_path = config_dir.join(ROUTES_FILE);
    if !routes_path.is_file() {
        return Err(BotError::MissingFile(routes_path));
    }
    let routes: PdfRoutes = serde_json::from_str(&fs::read_to_string(&routes_path)?)?;

    let mut records = Vec::new();
    for pdf in routes.path_pdf.into_vec() {
        if !pdf.exists() {
            warn!(pdf = %pdf.display(), "PDF listed in routes does not exist");
            continue;
        }
        match pdf_text::extract_record(&pdf) {
            Ok(record) => records.push(record),
            Err(e) => warn!(pdf = %pdf.display(), error = %e, "Extraction failed"),
        }
    }

    fs::write(
        config_dir.join(EXTRACTED_FILE),
        serde_json::to_string_pretty(&records)?,
    )?;
    info!(count = records.len(), "Extracted records written");
    Ok(records.len())
}
