// src/ui/sequence.rs

use super::{CounterpartyForm, DocumentKind, DriverState, FormField, UiAutomationClient};
use crate::error::{BotError, Result, UiError};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info, warn};

pub const PURCHASE_DOCUMENT_TYPE: &str = "FC - 1 - Compra";
pub const EXPENSE_LINE_KIND: &str = "Gasto / Cuenta contable";
pub const PAYMENT_ACCOUNT: &str = "Otras cuentas por pagar";

const VAT_RATE: f64 = 0.19;
const TOTAL_TOLERANCE: f64 = 0.005;

static TITLE_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":\s*(\S+)").expect("static regex"));

/// Everything the purchase-invoice form needs, already resolved.
#[derive(Debug, Clone)]
pub struct PurchaseInvoice {
    pub issue_date: String,
    pub counterparty_nit: String,
    pub counterparty: Option<CounterpartyForm>,
    pub prefix: String,
    pub consecutive: String,
    pub cost_center: String,
    pub product_code: String,
    /// Gross total read from the PDF, typed as the unit value.
    pub unit_value: String,
    pub iva: String,
    pub row_total: String,
    pub tax_rate_label: String,
    pub tax_product_code: String,
}

#[derive(Debug, Clone)]
pub struct DebitNote {
    /// Number the accounting application gave the referenced invoice.
    pub referenced_document: String,
}

/// What to do about VAT after the first line.
#[derive(Debug, Clone, PartialEq)]
pub enum TaxLine {
    /// No VAT declared on the row.
    Skip,
    /// Unit value plus 19% matches the row total: pick the client's tax option.
    SelectRate,
    /// Totals disagree: add a second line carrying the VAT amount.
    SecondLine,
}

/// Decide the tax line from the row's IVA, the unit value and the row total.
pub fn plan_tax_line(iva: &str, unit_value: f64, row_total: f64) -> TaxLine {
    if !vat_applies(iva) {
        return TaxLine::Skip;
    }

    let vat = (unit_value * VAT_RATE * 100.0).round() / 100.0;
    if (unit_value + vat - row_total).abs() > TOTAL_TOLERANCE {
        TaxLine::SecondLine
    } else {
        TaxLine::SelectRate
    }
}

/// False for a blank, dash-only or zero IVA.
fn vat_applies(iva: &str) -> bool {
    let iva = iva.trim();
    if iva.replace('-', "").trim().is_empty() || iva.eq_ignore_ascii_case("nan") {
        warn!("IVA is blank, no tax line");
        return false;
    }
    !iva.parse::<f64>().is_ok_and(|v| v == 0.0)
}

/// Document number from the saved document's title, e.g. "Factura No: FC-1-501".
pub fn extract_document_number(title: &str) -> Option<String> {
    TITLE_NUMBER_RE.captures(title).map(|c| c[1].to_string())
}

fn parse_amount(what: &str, raw: &str) -> Result<f64> {
    raw.trim()
        .parse()
        .map_err(|_| BotError::Row(format!("{what} is not a number: {raw:?}")))
}

fn require_code(what: &str, code: &str) -> Result<()> {
    let code = code.trim();
    if code.is_empty() || code.eq_ignore_ascii_case("nan") {
        return Err(BotError::Row(format!("{what} is missing")));
    }
    Ok(())
}

/// Live session against the accounting application, with the script state.
pub struct UiSession<C: UiAutomationClient> {
    client: C,
    state: DriverState,
    trail: Vec<DriverState>,
    entered_client: Option<String>,
}

impl<C: UiAutomationClient> UiSession<C> {
    pub fn new(client: C) -> Self {
        Self {
            client,
            state: DriverState::LoggedOut,
            trail: vec![DriverState::LoggedOut],
            entered_client: None,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> DriverState {
        self.state
    }

    /// Every state passed through since the session started.
    #[cfg(test)]
    pub fn trail(&self) -> &[DriverState] {
        &self.trail
    }

    fn advance(&mut self, next: DriverState) {
        debug!(from = ?self.state, to = ?next, "Script step");
        self.state = next;
        self.trail.push(next);
    }

    pub fn login(&mut self, url: &str, username: &str, password: &str) -> Result<()> {
        self.client.navigate(url)?;
        self.client.login(username, password)?;
        info!(user = %username, "Logged in");
        self.advance(DriverState::LoggedIn);
        Ok(())
    }

    /// Open the client workspace; only the first call per session does anything.
    pub fn enter_client(&mut self, client_nit: &str) -> Result<()> {
        if self.entered_client.as_deref() == Some(client_nit) {
            return Ok(());
        }
        self.client.enter_client(client_nit)?;
        info!(client = %client_nit, "Client workspace opened");
        self.entered_client = Some(client_nit.to_string());
        self.advance(DriverState::ClientSelected);
        Ok(())
    }

    /// Log a best-effort step's failure and carry on.
    fn best_effort(step: &str, result: std::result::Result<(), UiError>) {
        if let Err(e) = result {
            warn!(step, error = %e, "Optional step failed, continuing");
        }
    }

    fn open_document(&mut self, kind: DocumentKind) -> Result<()> {
        if self.entered_client.is_none() {
            return Err(UiError::Session("no client workspace open".into()).into());
        }
        self.client.open_create_menu(kind)?;
        self.advance(DriverState::DocumentTypeChosen);
        Ok(())
    }

    /// Payment account, popup, save and number: the tail shared by both flows.
    fn finish_document(&mut self) -> Result<String> {
        self.client.choose_option(FormField::PaymentAccount, PAYMENT_ACCOUNT)?;
        self.advance(DriverState::PaymentMethodSelected);

        Self::best_effort("dismiss popup", self.client.dismiss_popup());

        self.client.save()?;
        self.advance(DriverState::Saved);

        let title = self.client.wait_for_text()?;
        let number = extract_document_number(&title).ok_or_else(|| UiError::UnexpectedValue {
            field: "document title".into(),
            expected: "text like \"No: <number>\"".into(),
            actual: title.clone(),
        })?;
        self.advance(DriverState::NumberExtracted);
        info!(number = %number, "Document saved");

        self.advance(DriverState::Terminal);
        // Ready for the next document in the same workspace.
        self.state = DriverState::ClientSelected;
        Ok(number)
    }

    pub fn post_purchase_invoice(&mut self, doc: &PurchaseInvoice) -> Result<String> {
        let unit_value = parse_amount("gross total", &doc.unit_value)?;
        // The row total only matters when there is VAT to reconcile.
        let tax_line = if vat_applies(&doc.iva) {
            plan_tax_line(&doc.iva, unit_value, parse_amount("row total", &doc.row_total)?)
        } else {
            TaxLine::Skip
        };

        self.open_document(DocumentKind::PurchaseInvoice)?;
        self.advance(DriverState::PurchaseInvoiceFlow);

        self.client.select_document_type(PURCHASE_DOCUMENT_TYPE)?;
        self.client.fill_field(FormField::DocumentDate, &doc.issue_date)?;
        self.client.fill_field(FormField::Counterparty, &doc.counterparty_nit)?;

        if self.client.counterparty_form_open().unwrap_or(false) {
            match &doc.counterparty {
                Some(form) => {
                    let registered = self
                        .client
                        .register_counterparty(form)
                        .and_then(|_| self.client.fill_field(FormField::Counterparty, &form.nit));
                    match registered {
                        Ok(()) => self.advance(DriverState::CounterpartyRegistered),
                        Err(e) => warn!(error = %e, "Counterparty registration failed, continuing"),
                    }
                }
                None => warn!(
                    nit = %doc.counterparty_nit,
                    "Counterparty unknown and PDF lacks contributor type or regime"
                ),
            }
        }

        self.client.fill_field(FormField::ExternalPrefix, &doc.prefix)?;
        self.client.fill_field(FormField::ExternalConsecutive, &doc.consecutive)?;

        self.client.fill_field(FormField::CostCenter, &doc.cost_center)?;
        let entered = self.client.field_value(FormField::CostCenter)?;
        if entered != doc.cost_center {
            return Err(UiError::UnexpectedValue {
                field: FormField::CostCenter.to_string(),
                expected: doc.cost_center.clone(),
                actual: entered,
            }
            .into());
        }

        self.client.choose_option(FormField::LineKind, EXPENSE_LINE_KIND)?;
        require_code("product code", &doc.product_code)?;
        self.client.fill_field(FormField::Product, &doc.product_code)?;
        self.client.type_slowly(FormField::UnitValue, &doc.unit_value)?;
        self.advance(DriverState::FieldsEntered);

        match tax_line {
            TaxLine::Skip => {}
            TaxLine::SecondLine => {
                info!(iva = %doc.iva, "Totals disagree, adding a VAT line");
                require_code("tax product code", &doc.tax_product_code)?;
                self.client.add_line_item()?;
                self.client.choose_option(FormField::LineKind, EXPENSE_LINE_KIND)?;
                self.client.fill_field(FormField::Product, &doc.tax_product_code)?;
                self.client.type_slowly(FormField::UnitValue, doc.iva.trim())?;
                self.advance(DriverState::TaxLineEntered);
            }
            TaxLine::SelectRate => match self.client.select_tax_option(&doc.tax_rate_label)? {
                Some(label) => {
                    info!(option = %label, "Tax option selected");
                    self.advance(DriverState::TaxLineEntered);
                }
                None => warn!(label = %doc.tax_rate_label, "No tax option matches the client's rate"),
            },
        }

        self.finish_document()
    }

    pub fn post_debit_note(&mut self, doc: &DebitNote) -> Result<String> {
        self.open_document(DocumentKind::DebitNote)?;
        self.advance(DriverState::DebitNoteFlow);

        self.client
            .fill_field(FormField::ReferencedDocument, &doc.referenced_document)?;
        self.advance(DriverState::FieldsEntered);

        self.finish_document()
    }

    /// End the session; a failure here only matters to the log.
    pub fn close(mut self) {
        Self::best_effort("close session", self.client.close());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ui::tests::FakeUi;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn invoice() -> PurchaseInvoice {
        PurchaseInvoice {
            issue_date: "15/03/2025".into(),
            counterparty_nit: "800100200".into(),
            counterparty: None,
            prefix: "FV".into(),
            consecutive: "100".into(),
            cost_center: "CC-1".into(),
            product_code: "P-01".into(),
            unit_value: "100.00".into(),
            iva: "19".into(),
            row_total: "119".into(),
            tax_rate_label: "IVA 19".into(),
            tax_product_code: "IVA19".into(),
        }
    }

    fn session(fake: FakeUi) -> UiSession<FakeUi> {
        let mut s = UiSession::new(fake);
        s.login("https://app", "bot", "pw").unwrap();
        s.enter_client("900123456").unwrap();
        s
    }

    #[test]
    fn test_plan_tax_line() {
        assert_eq!(plan_tax_line("", 100.0, 119.0), TaxLine::Skip);
        assert_eq!(plan_tax_line(" - ", 100.0, 119.0), TaxLine::Skip);
        assert_eq!(plan_tax_line("0", 100.0, 119.0), TaxLine::Skip);
        assert_eq!(plan_tax_line("19", 100.0, 119.0), TaxLine::SelectRate);
        assert_eq!(plan_tax_line("19", 100.0, 120.0), TaxLine::SecondLine);
        // 33.33 * 0.19 = 6.3327, rounded to 6.33
        assert_eq!(plan_tax_line("6.33", 33.33, 39.66), TaxLine::SelectRate);
    }

    #[test]
    fn test_extract_document_number() {
        assert_eq!(extract_document_number("Factura de compra No: FC-1-501").as_deref(), Some("FC-1-501"));
        assert_eq!(extract_document_number("sin numero"), None);
    }

    #[test]
    fn test_purchase_invoice_selects_rate() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut s = session(FakeUi::new(calls.clone()));
        let number = s.post_purchase_invoice(&invoice()).unwrap();
        assert_eq!(number, "FC-1-501");

        let calls = calls.borrow();
        assert!(calls.contains(&"type FC - 1 - Compra".to_string()));
        assert!(calls.contains(&"slow unit value=100.00".to_string()));
        assert!(calls.contains(&"tax IVA 19".to_string()));
        assert!(!calls.contains(&"add_line".to_string()));
        assert_eq!(
            &s.trail()[s.trail().len() - 6..],
            &[
                DriverState::FieldsEntered,
                DriverState::TaxLineEntered,
                DriverState::PaymentMethodSelected,
                DriverState::Saved,
                DriverState::NumberExtracted,
                DriverState::Terminal,
            ]
        );
        assert_eq!(s.state(), DriverState::ClientSelected);
    }

    #[test]
    fn test_mismatched_total_adds_vat_line() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut s = session(FakeUi::new(calls.clone()));
        let mut doc = invoice();
        doc.row_total = "125".into();
        s.post_purchase_invoice(&doc).unwrap();

        let calls = calls.borrow();
        let add = calls.iter().position(|c| c == "add_line").unwrap();
        assert_eq!(calls[add + 2], "fill product=IVA19");
        assert_eq!(calls[add + 3], "slow unit value=19");
    }

    #[test]
    fn test_blank_total_is_fine_without_vat() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut s = session(FakeUi::new(calls.clone()));
        let mut doc = invoice();
        doc.iva = "".into();
        doc.row_total = "".into();
        assert_eq!(s.post_purchase_invoice(&doc).unwrap(), "FC-1-501");
        assert!(!calls.borrow().iter().any(|c| c.starts_with("tax ") || c == "add_line"));

        let mut s = session(FakeUi::new(Rc::new(RefCell::new(Vec::new()))));
        doc.iva = "19".into();
        assert!(matches!(s.post_purchase_invoice(&doc), Err(BotError::Row(_))));
    }

    #[test]
    fn test_cost_center_mismatch_is_fatal() {
        let mut fake = FakeUi::new(Rc::new(RefCell::new(Vec::new())));
        fake.values.insert(FormField::CostCenter, "CC-9".into());
        let mut s = session(fake);
        let err = s.post_purchase_invoice(&invoice()).unwrap_err();
        assert!(matches!(err, BotError::Ui(UiError::UnexpectedValue { .. })));
    }

    #[test]
    fn test_missing_product_code_is_fatal() {
        let mut s = session(FakeUi::new(Rc::new(RefCell::new(Vec::new()))));
        let mut doc = invoice();
        doc.product_code = "nan".into();
        assert!(matches!(s.post_purchase_invoice(&doc), Err(BotError::Row(_))));
    }

    #[test]
    fn test_popup_failure_is_best_effort_but_save_is_not() {
        let mut fake = FakeUi::new(Rc::new(RefCell::new(Vec::new())));
        fake.fail_popup = true;
        let mut s = session(fake);
        assert!(s.post_debit_note(&DebitNote { referenced_document: "FC-1-400".into() }).is_ok());

        let mut fake = FakeUi::new(Rc::new(RefCell::new(Vec::new())));
        fake.fail_save = true;
        let mut s = session(fake);
        assert!(s.post_debit_note(&DebitNote { referenced_document: "FC-1-400".into() }).is_err());
    }

    #[test]
    fn test_counterparty_registration_when_dialog_opens() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut fake = FakeUi::new(calls.clone());
        fake.counterparty_dialog = true;
        let mut s = session(fake);
        let mut doc = invoice();
        doc.counterparty = Some(CounterpartyForm {
            nit: "800100200".into(),
            name: "PROVEEDOR SAS".into(),
            kind: crate::ui::CounterpartyKind::Company,
            regime_code: Some("O-13".into()),
        });
        s.post_purchase_invoice(&doc).unwrap();
        assert!(calls.borrow().contains(&"register 800100200".to_string()));
        assert!(s.trail().contains(&DriverState::CounterpartyRegistered));
    }

    #[test]
    fn test_document_needs_client_workspace() {
        let mut s = UiSession::new(FakeUi::new(Rc::new(RefCell::new(Vec::new()))));
        s.login("https://app", "bot", "pw").unwrap();
        assert!(s.post_debit_note(&DebitNote { referenced_document: "1".into() }).is_err());
    }
}
