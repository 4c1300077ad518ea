// src/ui/mod.rs

pub mod sequence;
pub mod webdriver;

use crate::error::UiError;
use crate::heuristics::{ContributorType, ExtractedPdfRecord, fold_accents};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

pub use sequence::UiSession;
pub use webdriver::WebDriverClient;

pub type UiResult<T> = std::result::Result<T, UiError>;

/// Creation menu entry for the document being posted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PurchaseInvoice,
    DebitNote,
}

impl DocumentKind {
    pub fn menu_label(self) -> &'static str {
        match self {
            DocumentKind::PurchaseInvoice => "Factura de compra / Gasto",
            DocumentKind::DebitNote => "Nota débito (compras)",
        }
    }

    /// Debit notes are recognised by the word "nota" in the document type.
    pub fn for_document_type(document_type: &str) -> Self {
        if contains_nota(document_type) {
            DocumentKind::DebitNote
        } else {
            DocumentKind::PurchaseInvoice
        }
    }
}

/// Inputs of the document form, addressed by meaning rather than selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FormField {
    DocumentDate,
    Counterparty,
    ExternalPrefix,
    ExternalConsecutive,
    CostCenter,
    LineKind,
    Product,
    UnitValue,
    PaymentAccount,
    ReferencedDocument,
}

impl fmt::Display for FormField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FormField::DocumentDate => "document date",
            FormField::Counterparty => "counterparty",
            FormField::ExternalPrefix => "supplier prefix",
            FormField::ExternalConsecutive => "supplier consecutive",
            FormField::CostCenter => "cost center",
            FormField::LineKind => "line kind",
            FormField::Product => "product",
            FormField::UnitValue => "unit value",
            FormField::PaymentAccount => "payment account",
            FormField::ReferencedDocument => "referenced document",
        };
        f.write_str(name)
    }
}

/// Positions of the automation script.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    LoggedOut,
    LoggedIn,
    ClientSelected,
    DocumentTypeChosen,
    DebitNoteFlow,
    PurchaseInvoiceFlow,
    CounterpartyRegistered,
    FieldsEntered,
    TaxLineEntered,
    PaymentMethodSelected,
    Saved,
    NumberExtracted,
    Terminal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CounterpartyKind {
    Company,
    Person { first_name: String, last_name: String },
}

/// Data for the "new third party" dialog the application opens for unknown NITs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CounterpartyForm {
    pub nit: String,
    pub name: String,
    pub kind: CounterpartyKind,
    /// Regime checkbox to tick; `None` for "R-99-PN", which has no checkbox.
    pub regime_code: Option<String>,
}

impl CounterpartyForm {
    /// Build the dialog data from the vendor block of the PDF.
    ///
    /// Needs both contributor type and tax regime; anything else is not
    /// registrable and yields `None`.
    pub fn from_record(nit: &str, vendor_name: &str, record: &ExtractedPdfRecord) -> Option<Self> {
        let contributor = record.vendor.contributor_type.as_ref()?;
        let regime = record.vendor.tax_regime.as_deref()?;

        let kind = match contributor {
            ContributorType::LegalPerson => CounterpartyKind::Company,
            ContributorType::NaturalPerson => {
                let (first_name, last_name) = split_person_name(vendor_name);
                CounterpartyKind::Person { first_name, last_name }
            }
            ContributorType::Other(_) => return None,
        };

        Some(Self {
            nit: nit.to_string(),
            name: vendor_name.trim().to_string(),
            kind,
            regime_code: (regime != "R-99-PN").then(|| regime.to_string()),
        })
    }
}

/// First and last word of a personal name.
pub fn split_person_name(full: &str) -> (String, String) {
    let words: Vec<&str> = full.split_whitespace().collect();
    match words.as_slice() {
        [] => (String::new(), String::new()),
        [only] => (only.to_string(), String::new()),
        [first, .., last] => (first.to_string(), last.to_string()),
    }
}

static NOTA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bnota\b").expect("static regex"));

/// Whole word "nota", ignoring case and accents.
pub fn contains_nota(text: &str) -> bool {
    NOTA_RE.is_match(&fold_accents(text))
}

/// One logical action of the accounting web application per method.
///
/// Implementations own every selector and wait; callers see only the
/// business-level step and a `UiError` when it could not be completed.
pub trait UiAutomationClient {
    fn navigate(&mut self, url: &str) -> UiResult<()>;

    fn login(&mut self, username: &str, password: &str) -> UiResult<()>;

    /// Open the workspace of the accounting client with this NIT.
    fn enter_client(&mut self, client_nit: &str) -> UiResult<()>;

    fn open_create_menu(&mut self, kind: DocumentKind) -> UiResult<()>;

    fn select_document_type(&mut self, label: &str) -> UiResult<()>;

    /// Type into a field. Autocomplete fields are confirmed with Enter.
    fn fill_field(&mut self, field: FormField, value: &str) -> UiResult<()>;

    /// Pick a dropdown or autocomplete entry by its visible label.
    fn choose_option(&mut self, field: FormField, label: &str) -> UiResult<()>;

    /// Type one character at a time, for inputs that validate per keystroke.
    fn type_slowly(&mut self, field: FormField, value: &str) -> UiResult<()>;

    fn field_value(&mut self, field: FormField) -> UiResult<String>;

    fn add_line_item(&mut self) -> UiResult<()>;

    /// Select the first tax option whose label contains `label_part`.
    /// Returns the full label, or `None` when nothing matched.
    fn select_tax_option(&mut self, label_part: &str) -> UiResult<Option<String>>;

    fn counterparty_form_open(&mut self) -> UiResult<bool>;

    fn register_counterparty(&mut self, form: &CounterpartyForm) -> UiResult<()>;

    fn dismiss_popup(&mut self) -> UiResult<()>;

    fn save(&mut self) -> UiResult<()>;

    /// Text of the title shown once a document has been saved.
    fn wait_for_text(&mut self) -> UiResult<String>;

    fn close(&mut self) -> UiResult<()>;
}
