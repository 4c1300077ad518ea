// src/fetch.rs

use crate::archive::move_file;
use crate::config::Settings;
use crate::error::{BotError, Result};
use crate::helper::PdfFieldSource;
use crate::normalize::convert_to_string;
use crate::notify::{completion_body, notify_completion};
use crate::sheet::{
    COL_COST_CENTER, COL_CUFE, COL_DOCUMENT_TYPE, COL_ISSUER_NIT, COL_PRODUCT_CODE, Cell, InvoiceSheet,
    NO, YES, client_nit_from_path, is_spreadsheet, list_spreadsheets,
};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, info, info_span, warn};

pub const COL_STORED: &str = "PDF Almacenado";
pub const COL_PDF_INFO: &str = "Información PDF";
pub const COL_PRODUCT_NAME: &str = "Nombre del producto";
pub const NO_MATCH: &str = "sin coincidencia";

const CATALOG_NIT: &str = "Nit emisor";
const CATALOG_PRODUCT_NAME: &str = "Nombre del producto";
const CATALOG_PRODUCT_CODE: &str = "Código del Producto";
const CATALOG_COST_CENTER: &str = "Centro de Costo";

/// Something that can make the PDF of a CUFE appear in the downloads folder.
pub trait DocumentRetrievalClient {
    fn request(&mut self, cufe: &str, downloads: &Path) -> Result<()>;
}

/// Runs a configured command line, replacing `{cufe}` and `{downloads}` in each argument.
pub struct CommandRetrievalClient {
    argv: Vec<String>,
}

impl CommandRetrievalClient {
    pub fn new(argv: Vec<String>) -> Result<Self> {
        if argv.is_empty() {
            return Err(BotError::Config("comando_descarga is empty".into()));
        }
        Ok(Self { argv })
    }

    fn expand(&self, cufe: &str, downloads: &Path) -> Vec<String> {
        let downloads = downloads.display().to_string();
        self.argv
            .iter()
            .map(|a| a.replace("{cufe}", cufe).replace("{downloads}", &downloads))
            .collect()
    }
}

impl DocumentRetrievalClient for CommandRetrievalClient {
    fn request(&mut self, cufe: &str, downloads: &Path) -> Result<()> {
        let args = self.expand(cufe, downloads);
        let (program, rest) = args
            .split_first()
            .ok_or_else(|| BotError::Config("comando_descarga is empty".into()))?;
        let output = Command::new(program)
            .args(rest)
            .output()
            .map_err(|e| BotError::Retrieval(format!("cannot run {program}: {e}")))?;
        if !output.status.success() {
            return Err(BotError::Retrieval(format!(
                "{program} exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

/// How long to wait for a requested PDF to land in the downloads folder.
#[derive(Debug, Clone, Copy)]
pub struct DownloadWait {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for DownloadWait {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            interval: Duration::from_secs(2),
        }
    }
}

fn newest_pdf(dir: &Path) -> Result<Option<PathBuf>> {
    let mut newest: Option<(SystemTime, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let is_pdf = path
            .extension()
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if !is_pdf {
            continue;
        }
        let modified = fs::metadata(&path)?.modified()?;
        if newest.as_ref().is_none_or(|(t, _)| modified > *t) {
            newest = Some((modified, path));
        }
    }
    Ok(newest.map(|(_, p)| p))
}

/// Poll `dir` until a PDF shows up; the most recently modified one wins.
pub fn wait_for_download(dir: &Path, wait: DownloadWait) -> Result<Option<PathBuf>> {
    let start = Instant::now();
    loop {
        if let Some(pdf) = newest_pdf(dir)? {
            return Ok(Some(pdf));
        }
        if start.elapsed() >= wait.timeout {
            return Ok(None);
        }
        debug!("No PDF yet, waiting");
        thread::sleep(wait.interval);
    }
}

/// Move every spreadsheet from `origin` into `inputs`.
///
/// A name already taken in `inputs` becomes `<stem>_DUPLICADO<ext>`.
pub fn ingest_spreadsheets(origin: &Path, inputs: &Path) -> Result<Vec<PathBuf>> {
    if !origin.is_dir() {
        warn!(origin = %origin.display(), "Origin folder does not exist");
        return Ok(Vec::new());
    }
    fs::create_dir_all(inputs)?;

    let mut moved = Vec::new();
    for entry in fs::read_dir(origin)? {
        let src = entry?.path();
        if !is_spreadsheet(&src) {
            continue;
        }
        let Some(name) = src.file_name() else { continue };
        let mut dst = inputs.join(name);
        if dst.exists() {
            let stem = src.file_stem().and_then(|s| s.to_str()).unwrap_or("archivo");
            let ext = src.extension().and_then(|s| s.to_str()).unwrap_or("xlsx");
            dst = inputs.join(format!("{stem}_DUPLICADO.{ext}"));
        }
        move_file(&src, &dst)?;
        moved.push(dst);
    }
    info!(count = moved.len(), inputs = %inputs.display(), "Spreadsheets ingested");
    Ok(moved)
}

#[derive(Debug, Clone, PartialEq)]
struct CatalogEntry {
    product_name: String,
    product_code: String,
    cost_center: String,
}

/// Issuer NIT to product and cost center, first entry per NIT wins.
fn load_catalog(path: &Path) -> Result<HashMap<String, CatalogEntry>> {
    let catalog = InvoiceSheet::load(path)?;
    catalog.require_columns(&[CATALOG_NIT, CATALOG_PRODUCT_NAME, CATALOG_PRODUCT_CODE, CATALOG_COST_CENTER])?;

    let mut entries = HashMap::new();
    for r in 0..catalog.len() {
        let nit = convert_to_string(catalog.get(r, CATALOG_NIT)).trim().to_string();
        let code = catalog.get(r, CATALOG_PRODUCT_CODE);
        let product_code = if code.is_blank() {
            "0".to_string()
        } else {
            convert_to_string(code)
        };
        entries.entry(nit).or_insert_with(|| CatalogEntry {
            product_name: convert_to_string(catalog.get(r, CATALOG_PRODUCT_NAME)),
            product_code,
            cost_center: convert_to_string(catalog.get(r, CATALOG_COST_CENTER)),
        });
    }
    Ok(entries)
}

/// Fill product name, product code and cost center from the client catalog.
fn enrich_from_catalog(sheet: &mut InvoiceSheet, catalog: &HashMap<String, CatalogEntry>) -> usize {
    let mut matched = 0;
    for r in 0..sheet.len() {
        let nit = convert_to_string(sheet.get(r, COL_ISSUER_NIT)).trim().to_string();
        match catalog.get(&nit) {
            Some(entry) => {
                sheet.set_text(r, COL_PRODUCT_NAME, entry.product_name.clone());
                sheet.set_text(r, COL_PRODUCT_CODE, entry.product_code.clone());
                sheet.set_text(r, COL_COST_CENTER, entry.cost_center.clone());
                matched += 1;
            }
            None => {
                sheet.set_text(r, COL_PRODUCT_NAME, NO_MATCH);
                sheet.set_text(r, COL_PRODUCT_CODE, "");
                sheet.set_text(r, COL_COST_CENTER, "");
            }
        }
    }
    matched
}

/// Retrieves PDFs for every input spreadsheet.
pub struct FetchStage<'a, R, S> {
    settings: &'a Settings,
    retrieval: R,
    source: &'a S,
    wait: DownloadWait,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct FetchSummary {
    pub files: usize,
    pub stored: usize,
    pub pending: usize,
}

impl<'a, R: DocumentRetrievalClient, S: PdfFieldSource> FetchStage<'a, R, S> {
    pub fn new(settings: &'a Settings, retrieval: R, source: &'a S) -> Self {
        Self {
            settings,
            retrieval,
            source,
            wait: DownloadWait::default(),
        }
    }

    #[cfg(test)]
    pub fn with_wait(mut self, wait: DownloadWait) -> Self {
        self.wait = wait;
        self
    }

    /// Ingest, then up to `max_passes` passes over the inputs, then one notice per file.
    pub fn run(&mut self) -> Result<FetchSummary> {
        let settings = self.settings;
        let paths = &settings.config.paths;
        if let Some(origin) = &paths.origin {
            ingest_spreadsheets(origin, &paths.inputs)?;
        }
        fs::create_dir_all(&paths.downloads)?;

        let files = list_spreadsheets(&paths.inputs)?;
        let max_passes = settings.config.run.max_passes.max(1);
        let mut pending: HashMap<PathBuf, usize> = HashMap::new();

        for pass in 1..=max_passes {
            info!(pass, max_passes, "Retrieval pass");
            for file in &files {
                if pending.get(file) == Some(&0) {
                    continue;
                }
                let span = info_span!("fetch_file", file = %file.display());
                let _enter = span.enter();
                match self.process_file(file) {
                    Ok(left) => {
                        pending.insert(file.clone(), left);
                    }
                    Err(e) => warn!(error = %e, "File skipped this pass"),
                }
            }
            if files.iter().all(|f| pending.get(f) == Some(&0)) {
                break;
            }
        }

        let mut summary = FetchSummary {
            files: files.len(),
            ..Default::default()
        };
        for file in &files {
            let left = pending.get(file).copied().unwrap_or_default();
            summary.pending += left;
            if let Ok(sheet) = InvoiceSheet::load(file) {
                summary.stored += (0..sheet.len()).filter(|&r| sheet.is_marked(r, COL_STORED)).count();
            }
            let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
            notify_completion(
                settings.config.smtp.as_ref(),
                &settings.config.recipients,
                file,
                &completion_body(name, left),
            );
        }
        info!(files = summary.files, stored = summary.stored, pending = summary.pending, "Retrieval finished");
        Ok(summary)
    }

    /// Prepare one spreadsheet and download its missing PDFs. Returns rows still missing.
    fn process_file(&mut self, file: &Path) -> Result<usize> {
        let settings = self.settings;
        let config = &settings.config;
        let client = client_nit_from_path(file);
        let mut sheet = InvoiceSheet::load(file)?;
        sheet.ensure_column(COL_STORED, Cell::text(NO));
        sheet.ensure_column(COL_PDF_INFO, Cell::Empty);

        if sheet.unmarked_rows(COL_STORED).is_empty() {
            info!("Every PDF already stored, skipping");
            return Ok(0);
        }

        let excluded = &config.excluded_document_types;
        let before = sheet.len();
        sheet.retain_rows(|s, r| {
            let doc_type = convert_to_string(s.get(r, COL_DOCUMENT_TYPE));
            !excluded.iter().any(|x| x == doc_type.trim())
        });
        if sheet.len() != before {
            info!(dropped = before - sheet.len(), "Excluded document types removed");
        }

        let catalog_path = config.paths.config.join(format!("{client}.xlsx"));
        match load_catalog(&catalog_path) {
            Ok(catalog) => {
                let matched = enrich_from_catalog(&mut sheet, &catalog);
                info!(matched, rows = sheet.len(), "Catalog applied");
            }
            Err(e) => warn!(catalog = %catalog_path.display(), error = %e, "Catalog unavailable"),
        }
        sheet.save()?;

        let pdf_dir = config.paths.pdf.join(&client);
        for row in sheet.unmarked_rows(COL_STORED) {
            let cufe = convert_to_string(sheet.get(row, COL_CUFE)).trim().to_string();
            let span = info_span!("fetch_row", row, cufe = %cufe);
            let _enter = span.enter();
            if cufe.is_empty() {
                warn!("Row without CUFE");
                continue;
            }

            match self.retrieve(&cufe, &pdf_dir) {
                Ok(stored) => {
                    sheet.set_text(row, COL_STORED, YES);
                    match self.source.extract(&stored) {
                        Ok(record) => {
                            if let Some(description) = record.product_description {
                                sheet.set_text(row, COL_PDF_INFO, description);
                            }
                        }
                        Err(e) => warn!(error = %e, "Stored PDF could not be read"),
                    }
                }
                Err(e) => {
                    warn!(error = %e, "PDF not retrieved");
                    sheet.set_text(row, COL_STORED, NO);
                }
            }
            sheet.save()?;
        }

        Ok(sheet.unmarked_rows(COL_STORED).len())
    }

    fn retrieve(&mut self, cufe: &str, pdf_dir: &Path) -> Result<PathBuf> {
        let downloads = &self.settings.config.paths.downloads;
        self.retrieval.request(cufe, downloads)?;
        let downloaded = wait_for_download(downloads, self.wait)?.ok_or_else(|| {
            BotError::Retrieval(format!("no PDF within {}s", self.wait.timeout.as_secs()))
        })?;
        let target = pdf_dir.join(format!("{cufe}.pdf"));
        move_file(&downloaded, &target)?;
        info!(to = %target.display(), "PDF stored");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::write_fixture;
    use crate::heuristics::ExtractedPdfRecord;
    use crate::sheet::tests::input_sheet;

    /// Drops a PDF into the downloads folder unless the CUFE is listed as missing.
    struct FakeRetrieval {
        missing: Vec<String>,
        requested: Vec<String>,
    }

    impl DocumentRetrievalClient for FakeRetrieval {
        fn request(&mut self, cufe: &str, downloads: &Path) -> Result<()> {
            self.requested.push(cufe.to_string());
            if self.missing.iter().any(|m| m == cufe) {
                return Err(BotError::Retrieval("not found".into()));
            }
            fs::write(downloads.join(format!("{cufe}-download.pdf")), b"%PDF")?;
            Ok(())
        }
    }

    struct Described;

    impl PdfFieldSource for Described {
        fn extract(&self, pdf: &Path) -> Result<ExtractedPdfRecord> {
            Ok(ExtractedPdfRecord {
                source: pdf.to_path_buf(),
                product_description: Some("Servicio de aseo".into()),
                ..Default::default()
            })
        }
    }

    fn quick() -> DownloadWait {
        DownloadWait {
            timeout: Duration::from_millis(50),
            interval: Duration::from_millis(10),
        }
    }

    fn write_catalog(path: &Path) {
        let mut catalog = InvoiceSheet::new(
            path,
            [CATALOG_NIT, CATALOG_PRODUCT_NAME, CATALOG_PRODUCT_CODE, CATALOG_COST_CENTER]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        catalog.push_row(vec![
            Cell::Number(800100200.0),
            Cell::text("Aseo"),
            Cell::Number(7001.0),
            Cell::text("ADM"),
        ]);
        catalog.save().unwrap();
    }

    #[test]
    fn test_ingest_renames_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let origin = dir.path().join("origen");
        let inputs = dir.path().join("inputs");
        fs::create_dir_all(&origin).unwrap();
        fs::create_dir_all(&inputs).unwrap();
        fs::write(origin.join("900_a.xlsx"), b"new").unwrap();
        fs::write(origin.join("readme.txt"), b"").unwrap();
        fs::write(inputs.join("900_a.xlsx"), b"old").unwrap();

        let moved = ingest_spreadsheets(&origin, &inputs).unwrap();
        assert_eq!(moved, vec![inputs.join("900_a_DUPLICADO.xlsx")]);
        assert_eq!(fs::read(inputs.join("900_a.xlsx")).unwrap(), b"old");
        assert!(origin.join("readme.txt").exists());
        assert!(ingest_spreadsheets(&dir.path().join("nope"), &inputs).unwrap().is_empty());
    }

    #[test]
    fn test_wait_for_download_times_out() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(wait_for_download(dir.path(), quick()).unwrap(), None);
        fs::write(dir.path().join("x.pdf"), b"").unwrap();
        assert_eq!(wait_for_download(dir.path(), quick()).unwrap(), Some(dir.path().join("x.pdf")));
    }

    #[test]
    fn test_command_placeholders() {
        let client = CommandRetrievalClient::new(vec![
            "fetcher".into(),
            "--cufe={cufe}".into(),
            "{downloads}".into(),
        ])
        .unwrap();
        assert_eq!(
            client.expand("abc", Path::new("/dl")),
            vec!["fetcher", "--cufe=abc", "/dl"]
        );
        assert!(CommandRetrievalClient::new(Vec::new()).is_err());
    }

    #[test]
    fn test_fetch_stores_pdfs_and_enriches_rows() {
        let base = tempfile::tempdir().unwrap();
        write_fixture(base.path());
        fs::create_dir_all(base.path().join("inputs")).unwrap();
        let input = base.path().join("inputs/900123456_marzo.xlsx");
        let mut sheet = input_sheet(&input, 3);
        sheet.set_text(2, COL_DOCUMENT_TYPE, "Application response");
        sheet.push_row(vec![Cell::text("cufe9")]);
        sheet.set(3, COL_ISSUER_NIT, Cell::Number(1.0));
        sheet.save().unwrap();
        write_catalog(&base.path().join("config/900123456.xlsx"));

        let settings = Settings::load(base.path()).unwrap();
        let retrieval = FakeRetrieval {
            missing: vec!["cufe9".into()],
            requested: Vec::new(),
        };
        let mut stage = FetchStage::new(&settings, retrieval, &Described).with_wait(quick());
        let summary = stage.run().unwrap();

        assert_eq!(summary, FetchSummary { files: 1, stored: 2, pending: 1 });
        // The failing row is retried on every pass.
        let cufe9_requests = stage.retrieval.requested.iter().filter(|c| *c == "cufe9").count();
        assert_eq!(cufe9_requests, 3);

        assert!(base.path().join("pdf/900123456/cufe0.pdf").is_file());
        assert!(base.path().join("pdf/900123456/cufe1.pdf").is_file());

        let sheet = InvoiceSheet::load(&input).unwrap();
        assert_eq!(sheet.len(), 3);
        assert_eq!(sheet.get(0, COL_STORED), &Cell::text(YES));
        assert_eq!(sheet.get(0, COL_PDF_INFO), &Cell::text("Servicio de aseo"));
        assert_eq!(sheet.get(0, COL_PRODUCT_CODE), &Cell::text("7001"));
        assert_eq!(sheet.get(0, COL_COST_CENTER), &Cell::text("ADM"));
        assert_eq!(sheet.get(2, COL_PRODUCT_NAME), &Cell::text(NO_MATCH));
        assert_eq!(sheet.get(2, COL_STORED), &Cell::text(NO));
    }
}
