// src/run_loop.rs

use crate::archive::{
    MONTHLY_FOLDER, archive_dir, archive_pdf, archive_spreadsheet, consolidate_month, find_referenced_number,
    today,
};
use crate::checkpoint::{BatchProgress, ProgressStore};
use crate::config::{Credentials, Settings};
use crate::error::{BotError, Result};
use crate::heuristics::ExtractedPdfRecord;
use crate::helper::PdfFieldSource;
use crate::normalize::{NormalizedRow, normalize_row};
use crate::notify::{completion_body, notify_completion};
use crate::sheet::{
    COL_ERROR, COL_GENERATED, COL_OUTPUT_NAME, COL_PAYMENT_METHOD, COL_SUCCESS, InvoiceSheet, YES,
    client_nit_from_path, list_spreadsheets,
};
use crate::ui::sequence::{DebitNote, PurchaseInvoice};
use crate::ui::{CounterpartyForm, DocumentKind, UiAutomationClient, UiSession};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::thread;
use tracing::{debug, error, info, info_span, warn};

pub const SUCCESS: &str = "Procesamiento Exitoso";
pub const FAILED: &str = "Fallido";
const UNKNOWN_PAYMENT: &str = "null";

/// What a posted row leaves behind.
#[derive(Debug, Clone, PartialEq)]
pub struct PostedRow {
    pub document_number: String,
    pub payment_method: String,
    pub archived_pdf: PathBuf,
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct RunSummary {
    pub files: usize,
    pub posted: usize,
    pub failed: usize,
    pub pending: usize,
}

/// Drives every input spreadsheet through the accounting application.
pub struct RunLoop<'a, S> {
    settings: &'a Settings,
    source: &'a S,
    progress: ProgressStore,
    posted: usize,
    failed: usize,
}

impl<'a, S: PdfFieldSource> RunLoop<'a, S> {
    pub fn new(settings: &'a Settings, source: &'a S) -> Self {
        Self {
            settings,
            source,
            progress: ProgressStore::new(settings.progress_file()),
            posted: 0,
            failed: 0,
        }
    }

    /// Up to `max_passes` passes over the inputs, then notice, archive and
    /// monthly consolidation for each file.
    ///
    /// `open_session` is called once per file that still has pending rows.
    pub fn run<C, F>(&mut self, mut open_session: F) -> Result<RunSummary>
    where
        C: UiAutomationClient,
        F: FnMut() -> Result<C>,
    {
        let settings = self.settings;
        let files = list_spreadsheets(&settings.config.paths.inputs)?;
        let max_passes = settings.config.run.max_passes.max(1);
        let mut pending: HashMap<PathBuf, usize> = HashMap::new();

        for pass in 1..=max_passes {
            info!(pass, max_passes, files = files.len(), "Posting pass");
            for file in &files {
                if pending.get(file) == Some(&0) {
                    continue;
                }
                let span = info_span!("file", file = %file.display());
                let _enter = span.enter();
                match self.process_file(file, &mut open_session) {
                    Ok(left) => {
                        info!(pending = left, "File pass finished");
                        pending.insert(file.clone(), left);
                    }
                    Err(e) => error!(error = %e, "File pass aborted"),
                }
            }
            if files.iter().all(|f| pending.get(f) == Some(&0)) {
                break;
            }
        }

        let mut summary = RunSummary {
            files: files.len(),
            posted: self.posted,
            failed: self.failed,
            pending: 0,
        };
        for file in &files {
            let left = match pending.get(file) {
                Some(&n) => n,
                None => InvoiceSheet::load(file).map(|s| s.pending_rows().len()).unwrap_or_default(),
            };
            summary.pending += left;
            if let Err(e) = self.finish_file(file, left) {
                error!(file = %file.display(), error = %e, "Could not archive spreadsheet");
            }
        }
        info!(
            files = summary.files,
            posted = summary.posted,
            failed = summary.failed,
            pending = summary.pending,
            "Run finished"
        );
        Ok(summary)
    }

    /// One pass over one spreadsheet. Returns the rows still not generated.
    fn process_file<C, F>(&mut self, file: &Path, open_session: &mut F) -> Result<usize>
    where
        C: UiAutomationClient,
        F: FnMut() -> Result<C>,
    {
        let settings = self.settings;
        let client = client_nit_from_path(file);
        let mut sheet = InvoiceSheet::load(file)?;
        sheet.ensure_status_columns();
        if sheet.all_generated() {
            info!("Every row already generated, skipping");
            return Ok(0);
        }
        sheet.save()?;

        let batch_size = settings.config.run.batch_size;
        let mut progress = self
            .progress
            .resume_or_begin(sheet.path(), sheet.pending_rows(), batch_size)?;
        let credentials = settings.credentials_for(&client)?;

        let mut session = UiSession::new(open_session()?);
        let result = self.post_batches(&mut session, &mut sheet, &client, credentials, &mut progress);
        session.close();
        result?;

        let left = sheet.pending_rows().len();
        if left == 0 {
            self.progress.clear()?;
            info!("Every row generated");
        }
        Ok(left)
    }

    fn post_batches<C: UiAutomationClient>(
        &mut self,
        session: &mut UiSession<C>,
        sheet: &mut InvoiceSheet,
        client: &str,
        credentials: &Credentials,
        progress: &mut BatchProgress,
    ) -> Result<()> {
        let settings = self.settings;
        let run = &settings.config.run;
        session.login(&settings.config.urls.main, &credentials.username, &credentials.password)?;

        let total = progress.batch_count(run.batch_size);
        while let Some(batch) = progress.next_batch(run.batch_size) {
            let span = info_span!("batch", index = batch.index, of = total);
            let _enter = span.enter();
            info!(rows = batch.rows.len(), "Batch started");

            let mut handled = 0;
            for &row in &batch.rows {
                if sheet.is_marked(row, COL_GENERATED) {
                    continue;
                }
                handled += 1;
                let row_span = info_span!("row", row = row + 1);
                let _row_enter = row_span.enter();
                match self.post_row(session, sheet, row, client) {
                    Ok(posted) => {
                        mark_posted(sheet, row, &posted);
                        self.posted += 1;
                        info!(
                            number = %posted.document_number,
                            pdf = %posted.archived_pdf.display(),
                            "Row posted"
                        );
                    }
                    Err(e) => {
                        mark_failed(sheet, row, &e);
                        self.failed += 1;
                        warn!(error = %e, "Row failed");
                    }
                }
                sheet.save()?;
            }

            progress.commit(batch.index, handled)?;
            self.progress.save(progress)?;
            sheet.save()?;
            info!(handled, "Progress saved");

            if sheet.all_generated() {
                break;
            }
            if progress.next_batch(run.batch_size).is_some() && !run.cooldown().is_zero() {
                info!(secs = run.cooldown_secs, "Cooling down before the next batch");
                thread::sleep(run.cooldown());
            }
        }
        Ok(())
    }

    fn post_row<C: UiAutomationClient>(
        &self,
        session: &mut UiSession<C>,
        sheet: &InvoiceSheet,
        row: usize,
        client: &str,
    ) -> Result<PostedRow> {
        let settings = self.settings;
        let paths = &settings.config.paths;
        let normalized = normalize_row(sheet, row)?;

        let pdf = paths.pdf.join(client).join(format!("{}.pdf", normalized.cufe));
        if !pdf.is_file() {
            return Err(BotError::MissingFile(pdf));
        }
        let record = self.source.extract(&pdf)?;
        let (filled, fields) = record.coverage();
        info!(cufe = %normalized.cufe, filled, fields, "PDF fields extracted");

        session.enter_client(client)?;
        let document_number = match DocumentKind::for_document_type(&normalized.document_type) {
            DocumentKind::PurchaseInvoice => {
                let invoice = self.purchase_invoice(client, &normalized, &record)?;
                session.post_purchase_invoice(&invoice)?
            }
            DocumentKind::DebitNote => {
                let note = debit_note(&paths.output.join(client), &record)?;
                session.post_debit_note(&note)?
            }
        };

        let dir = archive_dir(&paths.output, client, today());
        let archived_pdf = archive_pdf(
            &pdf,
            &dir,
            &document_number,
            &normalized.vendor_name,
            &normalized.invoice_number,
        )?;

        Ok(PostedRow {
            document_number,
            payment_method: record.payment_method.unwrap_or_else(|| UNKNOWN_PAYMENT.to_string()),
            archived_pdf,
        })
    }

    fn purchase_invoice(
        &self,
        client: &str,
        row: &NormalizedRow,
        record: &ExtractedPdfRecord,
    ) -> Result<PurchaseInvoice> {
        let rules = self
            .settings
            .client_rules(client)
            .ok_or_else(|| BotError::Row(format!("no client rules for {client}")))?;
        debug!(client = %client, name = %rules.name, tax_rate = %rules.tax_rate, "Client rules");
        let unit_value = record
            .gross_total
            .clone()
            .ok_or_else(|| BotError::Row("gross total not found in PDF".into()))?;

        Ok(PurchaseInvoice {
            issue_date: row.issue_date.clone(),
            counterparty_nit: row.counterparty_nit.clone(),
            counterparty: CounterpartyForm::from_record(&row.counterparty_nit, &row.vendor_name, record),
            prefix: row.prefix.clone(),
            consecutive: row.consecutive.clone(),
            cost_center: rules.resolve_cost_center(&row.cost_center),
            product_code: row.product_code.clone(),
            unit_value,
            iva: row.iva.clone(),
            row_total: row.total.clone(),
            tax_rate_label: rules.tax_rate.clone(),
            tax_product_code: rules.tax_product_code.clone(),
        })
    }

    /// Completion notice, then the spreadsheet moves to today's archive folder
    /// and is appended to its month's workbook.
    fn finish_file(&self, file: &Path, pending: usize) -> Result<()> {
        let settings = self.settings;
        let config = &settings.config;
        let client = client_nit_from_path(file);
        let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();

        notify_completion(
            config.smtp.as_ref(),
            &config.recipients,
            file,
            &completion_body(name, pending),
        );

        let dir = archive_dir(&config.paths.output, &client, today());
        let archived = archive_spreadsheet(file, &dir, &client)?;
        consolidate_month(&archived, &config.paths.output.join(MONTHLY_FOLDER))?;
        Ok(())
    }
}

/// Resolve the number the application gave the invoice a debit note refers to.
fn debit_note(client_archive: &Path, record: &ExtractedPdfRecord) -> Result<DebitNote> {
    let reference = record
        .referenced_invoice
        .as_deref()
        .ok_or_else(|| BotError::Row("debit note PDF names no referenced invoice".into()))?;
    let referenced_document = find_referenced_number(client_archive, reference)?
        .ok_or_else(|| BotError::Row(format!("referenced invoice {reference} is not archived")))?;
    Ok(DebitNote { referenced_document })
}

fn mark_posted(sheet: &mut InvoiceSheet, row: usize, posted: &PostedRow) {
    sheet.set_text(row, COL_GENERATED, YES);
    sheet.set_text(row, COL_SUCCESS, SUCCESS);
    sheet.set_text(row, COL_PAYMENT_METHOD, posted.payment_method.clone());
    sheet.set_text(row, COL_ERROR, "");
    sheet.set_text(row, COL_OUTPUT_NAME, posted.document_number.clone());
}

fn mark_failed(sheet: &mut InvoiceSheet, row: usize, error: &BotError) {
    sheet.set_text(row, COL_SUCCESS, FAILED);
    sheet.set_text(row, COL_PAYMENT_METHOD, UNKNOWN_PAYMENT);
    sheet.set_text(row, COL_ERROR, error.to_string());
    sheet.set_text(row, COL_OUTPUT_NAME, "");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::write_fixture;
    use crate::heuristics::{ContributorType, VendorInfo};
    use crate::sheet::tests::input_sheet;
    use crate::sheet::{COL_DOCUMENT_TYPE, Cell, NO};
    use crate::ui::tests::FakeUi;
    use std::cell::RefCell;
    use std::fs;
    use std::rc::Rc;

    /// Answers every PDF with the same record.
    struct Canned(ExtractedPdfRecord);

    impl PdfFieldSource for Canned {
        fn extract(&self, pdf: &Path) -> Result<ExtractedPdfRecord> {
            Ok(ExtractedPdfRecord {
                source: pdf.to_path_buf(),
                ..self.0.clone()
            })
        }
    }

    fn record() -> ExtractedPdfRecord {
        ExtractedPdfRecord {
            vendor: VendorInfo {
                contributor_type: Some(ContributorType::LegalPerson),
                department: Some("Antioquia".into()),
                tax_regime: Some("O-13".into()),
            },
            payment_method: Some("Contado".into()),
            gross_total: Some("100.00".into()),
            ..Default::default()
        }
    }

    struct Fixture {
        base: tempfile::TempDir,
        input: PathBuf,
        settings: Settings,
    }

    fn fixture(rows: usize, with_pdfs: &[usize]) -> Fixture {
        let base = tempfile::tempdir().unwrap();
        write_fixture(base.path());
        fs::create_dir_all(base.path().join("inputs")).unwrap();
        let input = base.path().join("inputs/900123456_marzo.xlsx");
        input_sheet(&input, rows).save().unwrap();

        let pdf_dir = base.path().join("pdf/900123456");
        fs::create_dir_all(&pdf_dir).unwrap();
        for i in with_pdfs {
            fs::write(pdf_dir.join(format!("cufe{i}.pdf")), b"%PDF").unwrap();
        }
        let settings = Settings::load(base.path()).unwrap();
        Fixture { base, input, settings }
    }

    fn archived_sheet(f: &Fixture) -> InvoiceSheet {
        let dir = archive_dir(&f.base.path().join("output"), "900123456", today());
        InvoiceSheet::load(dir.join("900123456.xlsx")).unwrap()
    }

    #[test]
    fn test_run_posts_rows_and_archives() {
        let f = fixture(3, &[0, 2]);
        let calls = Rc::new(RefCell::new(Vec::new()));
        let source = Canned(record());
        let mut titles = vec!["No: FC-1-503", "No: FC-1-501"];

        let mut run = RunLoop::new(&f.settings, &source);
        let summary = run
            .run(|| {
                let mut fake = FakeUi::new(calls.clone());
                fake.title = titles.pop().unwrap_or("No: FC-1-599").to_string();
                Ok(fake)
            })
            .unwrap();

        // Row 1 has no PDF and is retried on every pass.
        assert_eq!(summary.files, 1);
        assert_eq!(summary.posted, 2);
        assert_eq!(summary.failed, 3);
        assert_eq!(summary.pending, 1);

        let calls = calls.borrow();
        assert_eq!(calls.iter().filter(|c| c.starts_with("login")).count(), 3);
        assert!(calls.iter().any(|c| c == "fill counterparty=800100200"));
        assert!(calls.iter().any(|c| c == "fill cost center=CC-1"));
        assert!(calls.iter().any(|c| c == "tax IVA 19"));

        let sheet = archived_sheet(&f);
        assert_eq!(sheet.get(0, COL_GENERATED), &Cell::text(YES));
        assert_eq!(sheet.get(0, COL_SUCCESS), &Cell::text(SUCCESS));
        assert_eq!(sheet.get(0, COL_PAYMENT_METHOD), &Cell::text("Contado"));
        assert_eq!(sheet.get(0, COL_OUTPUT_NAME), &Cell::text("FC-1-501"));
        assert_eq!(sheet.get(1, COL_GENERATED), &Cell::text(NO));
        assert_eq!(sheet.get(1, COL_SUCCESS), &Cell::text(FAILED));
        assert!(matches!(sheet.get(1, COL_ERROR), Cell::Text(t) if t.contains("cufe1.pdf")));
        assert!(!f.input.exists());

        let day = archive_dir(&f.base.path().join("output"), "900123456", today());
        assert!(day.join("FC-1-501_PROVEEDOR SAS_FV100.pdf").is_file());
        let monthly = f.base.path().join("output").join(MONTHLY_FOLDER).join("facturas_2025-03.xlsx");
        assert_eq!(InvoiceSheet::load(monthly).unwrap().len(), 3);
    }

    #[test]
    fn test_completed_file_clears_progress() {
        let f = fixture(2, &[0, 1]);
        let calls = Rc::new(RefCell::new(Vec::new()));
        let source = Canned(record());
        let mut n = 500;

        let mut run = RunLoop::new(&f.settings, &source);
        let summary = run
            .run(|| {
                n += 1;
                let mut fake = FakeUi::new(calls.clone());
                fake.title = format!("No: FC-1-{n}");
                Ok(fake)
            })
            .unwrap();

        assert_eq!(summary.posted, 2);
        assert_eq!(summary.pending, 0);
        assert!(!f.settings.progress_file().exists());
        // One session: the client workspace is entered once and both rows reuse it.
        let calls = calls.borrow();
        assert_eq!(calls.iter().filter(|c| c.starts_with("enter_client")).count(), 1);
        assert_eq!(calls.iter().filter(|c| *c == "save").count(), 2);
    }

    #[test]
    fn test_login_failure_leaves_fresh_checkpoint() {
        let f = fixture(2, &[0, 1]);
        let calls = Rc::new(RefCell::new(Vec::new()));
        let source = Canned(record());

        let mut run = RunLoop::new(&f.settings, &source);
        let summary = run
            .run(|| {
                let mut fake = FakeUi::new(calls.clone());
                fake.fail_login = true;
                Ok(fake)
            })
            .unwrap();

        assert_eq!(summary.posted, 0);
        assert_eq!(summary.pending, 2);
        let stored: BatchProgress =
            serde_json::from_str(&fs::read_to_string(f.settings.progress_file()).unwrap()).unwrap();
        assert_eq!(stored.last_batch, -1);
        assert_eq!(stored.rows_processed, 0);
        assert_eq!(calls.borrow().iter().filter(|c| *c == "close").count(), 3);
    }

    #[test]
    fn test_debit_note_uses_archived_invoice_number() {
        let f = fixture(1, &[0]);
        let mut sheet = InvoiceSheet::load(&f.input).unwrap();
        sheet.set_text(0, COL_DOCUMENT_TYPE, "Nota débito");
        sheet.save().unwrap();

        let earlier = f.base.path().join("output/900123456/2025/02/10");
        fs::create_dir_all(&earlier).unwrap();
        fs::write(earlier.join("FC-1-300_PROVEEDOR SAS_FV77.pdf"), b"").unwrap();

        let calls = Rc::new(RefCell::new(Vec::new()));
        let source = Canned(ExtractedPdfRecord {
            referenced_invoice: Some("FV77".into()),
            ..record()
        });
        let mut run = RunLoop::new(&f.settings, &source);
        let summary = run
            .run(|| {
                let mut fake = FakeUi::new(calls.clone());
                fake.title = "Nota débito No: ND-1-12".into();
                Ok(fake)
            })
            .unwrap();

        assert_eq!(summary.posted, 1);
        let calls = calls.borrow();
        assert!(calls.iter().any(|c| c == "create Nota débito (compras)"));
        assert!(calls.iter().any(|c| c == "fill referenced document=FC-1-300"));
        assert_eq!(archived_sheet(&f).get(0, COL_OUTPUT_NAME), &Cell::text("ND-1-12"));
    }

    #[test]
    fn test_missing_reference_fails_the_row() {
        let err = debit_note(Path::new("/nonexistent"), &record()).unwrap_err();
        assert!(matches!(err, BotError::Row(_)));
    }
}
