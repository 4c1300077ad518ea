// src/ui/webdriver.rs

use super::{CounterpartyForm, CounterpartyKind, DocumentKind, FormField, UiAutomationClient, UiResult};
use crate::error::UiError;
use reqwest::Method;
use reqwest::blocking::Client;
use serde_json::{Value, json};
use std::fmt;
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const SHADOW_KEY: &str = "shadow-6066-11e4-a52e-4f735466cecf";
const ENTER: &str = "\u{E007}";

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const KEYSTROKE_PAUSE: Duration = Duration::from_millis(100);
/// Autocomplete lists need a moment to fill before Enter picks the first hit.
const AUTOCOMPLETE_PAUSE: Duration = Duration::from_secs(3);
const DIALOG_PROBE: Duration = Duration::from_secs(3);

mod selectors {
    pub const USERNAME_HOST: &str = "#username";
    pub const USERNAME_INPUT: &str = "#username-input";
    pub const PASSWORD_HOST: &str = "#current-password";
    pub const PASSWORD_INPUT: &str = "#password-input";
    pub const LOGIN_SUBMIT: &str = r#"//*[@id="login-submit"]"#;

    pub const CLIENTS_HOST: &str = r#"//*[@style="z-index: 1;"]"#;
    pub const CLIENTS_TABLE: &str = "#wc-data-table-general";
    pub const CLIENT_ENTER_HOST: &str = "siigo-button-dropdown-atom";
    pub const CLIENT_ENTER_BUTTON: &str = ".button-dropdown__btn";

    pub const HEADER_HOST: &str = "siigo-header-molecule.data-siigo-five9";
    pub const CREATE_HOST: &str = "siigo-button-atom[data-id='header-create-button']";
    pub const CREATE_BUTTON: &str = "button[type='button'].btn-element";

    pub const DOCUMENT_TYPE_SELECT: &str = "//*[@value='ERPDocumentTypeID']/select";
    pub const DOCUMENT_DATE: &str = r#"(//*[@class="dx-texteditor-input-container"]/input)[1]"#;
    pub const COUNTERPARTY: &str = r#"(//*[@class="autocompletecontainer"]/div/input)[1]"#;
    pub const COST_CENTER: &str = r#"(//*[@class="autocompletecontainer"]/div/input)[2]"#;
    pub const PRODUCT: &str = r#"(//*[@class="autocompletecontainer"]/div/input)[4]"#;
    pub const REFERENCED_DOCUMENT: &str = r#"(//*[@class="autocompletecontainer"]//input)[1]"#;
    pub const EXTERNAL_PREFIX: &str = r#"//*[@id="txtExternalPrefix"]"#;
    pub const EXTERNAL_CONSECUTIVE: &str = r#"//*[@id="txtExternalConsecutive"]"#;
    pub const LINE_KIND_SELECT: &str = r#"//*[@id="trEditRow"]/div[2]/siigo-dropdownenum/select"#;
    pub const UNIT_VALUE: &str = r#"(//*[@class="dx-texteditor-container"]/div/input[@id="inputDecimal_siigoInputDecimal"])[3]"#;
    pub const ADD_LINE: &str = r#"//*[text()=" Agregar otro ítem "]"#;
    pub const TAX_SELECT: &str = r#"//siigo-dropdown[@id="editAddTax"]//*[@id="dropdown_dropdownSelect"]"#;
    pub const PAYMENT_INPUT: &str = r#"//*[@id="editingAcAccount_autocompleteInput"]"#;
    pub const POPUP_CLOSE: &str = r#"//*[@class="icon-siigo-simbolos-cerrar red"]"#;
    pub const SAVE_BUTTON: &str = r#"//*[contains(@class,"SiigoButtonPrimary")]"#;
    pub const TITLE: &str = r#"//*[@class="title-container"]"#;

    pub const COUNTERPARTY_MODAL: &str = r#"//*[@class="modal-content"]"#;
    pub const CONTRIBUTOR_HOST: &str = "#CO-CL-MX > div > siigo-dropdownlist-web";
    pub const CONTRIBUTOR_DROPDOWN: &str = ".mdc-select";
    pub const CONTRIBUTOR_OPTIONS: &str = "span.mdc-list-item__text";
    pub const IDENTIFICATION_HOST: &str = "#CO_P_E-2 > div > siigo-identification-input-web";
    pub const IDENTIFICATION_INPUT: &str = "#identification > input";
    pub const COMPANY_NAME_HOST: &str = "#MX_MR_EX-CO_E-1 > div > siigo-textfield-web";
    pub const FIRST_NAME_HOST: &str = "#MX_FS-CO_P-1 > div > siigo-textfield-web";
    pub const LAST_NAME_HOST: &str = "#MX_FS-CO_P2 > div > siigo-textfield-web";
    pub const TEXTFIELD_INPUT: &str = ".mdc-text-field__input";
    pub const MODAL_SAVE_HOST: &str =
        "body > modal-container > div > div > div > div.modal-footer > div > siigo-button-atom:nth-child(2)";
}

/// Ways to locate an element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selector {
    Css(String),
    XPath(String),
}

impl Selector {
    fn using(&self) -> &'static str {
        match self {
            Selector::Css(_) => "css selector",
            Selector::XPath(_) => "xpath",
        }
    }

    fn value(&self) -> &str {
        match self {
            Selector::Css(s) | Selector::XPath(s) => s,
        }
    }

    fn body(&self) -> Value {
        json!({ "using": self.using(), "value": self.value() })
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.using(), self.value())
    }
}

fn css(s: &str) -> Selector {
    Selector::Css(s.to_string())
}

fn xpath(s: &str) -> Selector {
    Selector::XPath(s.to_string())
}

/// Where a lookup starts: the document, an element, or a shadow root.
#[derive(Debug, Clone)]
enum Scope {
    Document,
    Element(String),
    Shadow(String),
}

impl Scope {
    fn path(&self, many: bool) -> String {
        let suffix = if many { "elements" } else { "element" };
        match self {
            Scope::Document => format!("/{suffix}"),
            Scope::Element(id) => format!("/element/{id}/{suffix}"),
            Scope::Shadow(id) => format!("/shadow/{id}/{suffix}"),
        }
    }
}

/// W3C WebDriver client driving a chromedriver process.
pub struct WebDriverClient {
    http: Client,
    base_url: String,
    session_id: String,
    driver: Option<Child>,
    timeout: Duration,
}

impl WebDriverClient {
    /// Start chromedriver on `port` and open a browser session.
    pub fn launch(driver_path: &Path, port: u16, downloads: &Path, timeout: Duration) -> UiResult<Self> {
        info!(driver = %driver_path.display(), port, "Starting web driver");
        let mut child = Command::new(driver_path)
            .arg(format!("--port={port}"))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| UiError::Session(format!("cannot start {}: {e}", driver_path.display())))?;

        let base_url = format!("http://127.0.0.1:{port}");
        match Self::connect(&base_url, downloads, timeout) {
            Ok(mut client) => {
                client.driver = Some(child);
                Ok(client)
            }
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                Err(e)
            }
        }
    }

    /// Open a session on a driver that is already listening at `base_url`.
    pub fn connect(
        base_url: &str,
        downloads: &Path,
        timeout: Duration,
    ) -> UiResult<Self> {
        let http = Client::builder().timeout(Duration::from_secs(60)).build()?;
        wait_until_ready(&http, base_url, timeout)?;

        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": ["--start-maximized", "--disable-notifications"],
                        "prefs": {
                            "download.default_directory": downloads.display().to_string(),
                            "download.prompt_for_download": false
                        }
                    }
                }
            }
        });
        let resp = http.post(format!("{base_url}/session")).json(&capabilities).send()?;
        let body: Value = resp.json()?;
        let session_id = body["value"]["sessionId"]
            .as_str()
            .ok_or_else(|| UiError::Session(format!("no session id in {body}")))?
            .to_string();
        info!(session = %session_id, "Browser session opened");

        Ok(Self {
            http,
            base_url: base_url.to_string(),
            session_id,
            driver: None,
            timeout,
        })
    }

    fn command(&self, method: Method, path: &str, body: Option<Value>) -> UiResult<Value> {
        let url = format!("{}/session/{}{}", self.base_url, self.session_id, path);
        let mut req = self.http.request(method.clone(), &url);
        if let Some(body) = body {
            req = req.json(&body);
        }
        let resp = req.send()?;
        let status = resp.status();
        let payload: Value = resp.json()?;
        if status.is_success() {
            return Ok(payload["value"].clone());
        }

        let error = payload["value"]["error"].as_str().unwrap_or("unknown error");
        let message = payload["value"]["message"].as_str().unwrap_or_default();
        debug!(%method, path, error, "WebDriver command failed");
        match error {
            "no such element" | "no such shadow root" | "stale element reference" => {
                Err(UiError::ElementNotFound(message.to_string()))
            }
            _ => Err(UiError::Session(format!("{error}: {message}"))),
        }
    }

    fn post(&self, path: &str, body: Value) -> UiResult<Value> {
        self.command(Method::POST, path, Some(body))
    }

    fn get(&self, path: &str) -> UiResult<Value> {
        self.command(Method::GET, path, None)
    }

    fn find_once(&self, scope: &Scope, selector: &Selector) -> UiResult<Option<String>> {
        match self.post(&scope.path(false), selector.body()) {
            Ok(value) => Ok(value[ELEMENT_KEY].as_str().map(str::to_string)),
            Err(UiError::ElementNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Poll for an element until it appears or `timeout` passes.
    fn find_within(&self, scope: &Scope, selector: &Selector, timeout: Duration) -> UiResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(id) = self.find_once(scope, selector)? {
                return Ok(id);
            }
            if Instant::now() >= deadline {
                return Err(UiError::Timeout {
                    what: selector.to_string(),
                    secs: timeout.as_secs(),
                });
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn wait_for(&self, selector: &Selector) -> UiResult<String> {
        self.find_within(&Scope::Document, selector, self.timeout)
    }

    fn find_all(&self, scope: &Scope, selector: &Selector) -> UiResult<Vec<String>> {
        let value = self.post(&scope.path(true), selector.body())?;
        Ok(value
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v[ELEMENT_KEY].as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default())
    }

    fn shadow_root(&self, element: &str) -> UiResult<Scope> {
        let value = self.get(&format!("/element/{element}/shadow"))?;
        value[SHADOW_KEY]
            .as_str()
            .map(|id| Scope::Shadow(id.to_string()))
            .ok_or_else(|| UiError::ElementNotFound(format!("shadow root of {element}")))
    }

    /// Element inside the shadow root of the element found by `host`.
    fn in_shadow(&self, host: &Selector, inner: &str) -> UiResult<String> {
        let host_id = self.wait_for(host)?;
        let root = self.shadow_root(&host_id)?;
        self.find_within(&root, &css(inner), self.timeout)
    }

    fn click(&self, element: &str) -> UiResult<()> {
        self.post(&format!("/element/{element}/click"), json!({}))?;
        Ok(())
    }

    fn clear(&self, element: &str) -> UiResult<()> {
        self.post(&format!("/element/{element}/clear"), json!({}))?;
        Ok(())
    }

    fn send_keys(&self, element: &str, text: &str) -> UiResult<()> {
        self.post(&format!("/element/{element}/value"), json!({ "text": text }))?;
        Ok(())
    }

    fn text(&self, element: &str) -> UiResult<String> {
        let value = self.get(&format!("/element/{element}/text"))?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    fn execute(&self, script: &str, element: &str) -> UiResult<Value> {
        self.post(
            "/execute/sync",
            json!({ "script": script, "args": [{ ELEMENT_KEY: element }] }),
        )
    }

    fn select_by_text(&self, select: &Selector, label: &str) -> UiResult<()> {
        let select_id = self.wait_for(select)?;
        let option = xpath(&format!(".//option[normalize-space(.)='{label}']"));
        let option_id = self.find_within(&Scope::Element(select_id), &option, self.timeout)?;
        self.click(&option_id)
    }

    fn type_into_autocomplete(&self, selector: &str, value: &str) -> UiResult<()> {
        let input = self.wait_for(&xpath(selector))?;
        self.send_keys(&input, value)?;
        thread::sleep(AUTOCOMPLETE_PAUSE);
        self.send_keys(&input, ENTER)
    }

    fn selector_for(field: FormField) -> Selector {
        let path = match field {
            FormField::DocumentDate => selectors::DOCUMENT_DATE,
            FormField::Counterparty => selectors::COUNTERPARTY,
            FormField::ExternalPrefix => selectors::EXTERNAL_PREFIX,
            FormField::ExternalConsecutive => selectors::EXTERNAL_CONSECUTIVE,
            FormField::CostCenter => selectors::COST_CENTER,
            FormField::LineKind => selectors::LINE_KIND_SELECT,
            FormField::Product => selectors::PRODUCT,
            FormField::UnitValue => selectors::UNIT_VALUE,
            FormField::PaymentAccount => selectors::PAYMENT_INPUT,
            FormField::ReferencedDocument => selectors::REFERENCED_DOCUMENT,
        };
        xpath(path)
    }

    fn fill_textfield(&self, host: &str, value: &str) -> UiResult<()> {
        let input = self.in_shadow(&css(host), selectors::TEXTFIELD_INPUT)?;
        self.send_keys(&input, value)
    }
}

fn wait_until_ready(http: &Client, base_url: &str, timeout: Duration) -> UiResult<()> {
    let deadline = Instant::now() + timeout;
    loop {
        let ready = http
            .get(format!("{base_url}/status"))
            .send()
            .ok()
            .and_then(|r| r.json::<Value>().ok())
            .is_some_and(|v| v["value"]["ready"].as_bool().unwrap_or(false));
        if ready {
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(UiError::Timeout {
                what: format!("web driver at {base_url}"),
                secs: timeout.as_secs(),
            });
        }
        thread::sleep(POLL_INTERVAL);
    }
}

impl UiAutomationClient for WebDriverClient {
    fn navigate(&mut self, url: &str) -> UiResult<()> {
        self.post("/url", json!({ "url": url }))?;
        info!(url, "Navigated");
        Ok(())
    }

    fn login(&mut self, username: &str, password: &str) -> UiResult<()> {
        let user = self.in_shadow(&css(selectors::USERNAME_HOST), selectors::USERNAME_INPUT)?;
        self.send_keys(&user, username)?;
        let pass = self.in_shadow(&css(selectors::PASSWORD_HOST), selectors::PASSWORD_INPUT)?;
        self.send_keys(&pass, password)?;
        let submit = self.wait_for(&xpath(selectors::LOGIN_SUBMIT))?;
        self.click(&submit)
    }

    fn enter_client(&mut self, client_nit: &str) -> UiResult<()> {
        let table = self.in_shadow(&xpath(selectors::CLIENTS_HOST), selectors::CLIENTS_TABLE)?;
        for row in self.find_all(&Scope::Element(table), &css("tr"))? {
            if !self.text(&row)?.contains(client_nit) {
                continue;
            }
            let host = self.find_within(
                &Scope::Element(row),
                &css(selectors::CLIENT_ENTER_HOST),
                self.timeout,
            )?;
            let root = self.shadow_root(&host)?;
            let button = self.find_within(&root, &css(selectors::CLIENT_ENTER_BUTTON), self.timeout)?;
            return self.click(&button);
        }
        Err(UiError::ElementNotFound(format!("client {client_nit} in the clients table")))
    }

    fn open_create_menu(&mut self, kind: DocumentKind) -> UiResult<()> {
        let header = self.wait_for(&css(selectors::HEADER_HOST))?;
        let header_root = self.shadow_root(&header)?;
        let create_host = self.find_within(&header_root, &css(selectors::CREATE_HOST), self.timeout)?;
        let create_root = self.shadow_root(&create_host)?;
        let create = self.find_within(&create_root, &css(selectors::CREATE_BUTTON), self.timeout)?;
        self.click(&create)?;

        let item = css(&format!("a[data-value='{}']", kind.menu_label()));
        let entry = self.find_within(&header_root, &item, self.timeout)?;
        self.click(&entry)
    }

    fn select_document_type(&mut self, label: &str) -> UiResult<()> {
        self.select_by_text(&xpath(selectors::DOCUMENT_TYPE_SELECT), label)
    }

    fn fill_field(&mut self, field: FormField, value: &str) -> UiResult<()> {
        match field {
            FormField::DocumentDate => {
                let input = self.wait_for(&Self::selector_for(field))?;
                self.click(&input)?;
                let script = format!(
                    "arguments[0].value = {}; \
                     arguments[0].dispatchEvent(new Event('input')); \
                     arguments[0].dispatchEvent(new Event('change'));",
                    Value::String(value.to_string())
                );
                self.execute(&script, &input)?;
                Ok(())
            }
            FormField::Counterparty
            | FormField::CostCenter
            | FormField::Product
            | FormField::ReferencedDocument => {
                let selector = Self::selector_for(field);
                self.type_into_autocomplete(selector.value(), value)
            }
            FormField::ExternalPrefix | FormField::ExternalConsecutive | FormField::UnitValue => {
                let input = self.wait_for(&Self::selector_for(field))?;
                self.click(&input)?;
                self.clear(&input)?;
                self.send_keys(&input, value)
            }
            FormField::LineKind | FormField::PaymentAccount => self.choose_option(field, value),
        }
    }

    fn choose_option(&mut self, field: FormField, label: &str) -> UiResult<()> {
        match field {
            FormField::LineKind => self.select_by_text(&Self::selector_for(field), label),
            FormField::PaymentAccount => {
                let input = self.wait_for(&Self::selector_for(field))?;
                self.execute(
                    "arguments[0].scrollIntoView({behavior: 'smooth', block: 'center'});",
                    &input,
                )?;
                self.click(&input)?;
                let entry = xpath(&format!(
                    "//table[contains(@class, 'siigo-ac-table')]//div[text()=' {label} ']"
                ));
                let entry = self.wait_for(&entry)?;
                self.click(&entry)
            }
            _ => self.fill_field(field, label),
        }
    }

    fn type_slowly(&mut self, field: FormField, value: &str) -> UiResult<()> {
        let input = self.wait_for(&Self::selector_for(field))?;
        self.click(&input)?;
        self.clear(&input)?;
        for ch in value.chars() {
            self.send_keys(&input, ch.encode_utf8(&mut [0; 4]))?;
            thread::sleep(KEYSTROKE_PAUSE);
        }
        Ok(())
    }

    fn field_value(&mut self, field: FormField) -> UiResult<String> {
        let input = self.wait_for(&Self::selector_for(field))?;
        let value = self.get(&format!("/element/{input}/property/value"))?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    fn add_line_item(&mut self) -> UiResult<()> {
        let button = self.wait_for(&xpath(selectors::ADD_LINE))?;
        self.click(&button)
    }

    fn select_tax_option(&mut self, label_part: &str) -> UiResult<Option<String>> {
        let select = self.wait_for(&xpath(selectors::TAX_SELECT))?;
        for option in self.find_all(&Scope::Element(select), &css("option"))? {
            let label = self.text(&option)?;
            if label.contains(label_part) {
                self.click(&option)?;
                return Ok(Some(label));
            }
        }
        Ok(None)
    }

    fn counterparty_form_open(&mut self) -> UiResult<bool> {
        match self.find_within(&Scope::Document, &xpath(selectors::COUNTERPARTY_MODAL), DIALOG_PROBE) {
            Ok(_) => Ok(true),
            Err(UiError::Timeout { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn register_counterparty(&mut self, form: &CounterpartyForm) -> UiResult<()> {
        info!(nit = %form.nit, kind = ?form.kind, "Registering counterparty");
        let host = self.wait_for(&css(selectors::CONTRIBUTOR_HOST))?;
        let root = self.shadow_root(&host)?;
        let dropdown = self.find_within(&root, &css(selectors::CONTRIBUTOR_DROPDOWN), self.timeout)?;
        self.click(&dropdown)?;

        let wanted = match form.kind {
            CounterpartyKind::Company => "Empresa",
            CounterpartyKind::Person { .. } => "Es persona",
        };
        let mut picked = false;
        for option in self.find_all(&root, &css(selectors::CONTRIBUTOR_OPTIONS))? {
            if self.text(&option)?.contains(wanted) {
                self.click(&option)?;
                picked = true;
                break;
            }
        }
        if !picked {
            return Err(UiError::ElementNotFound(format!("contributor option {wanted:?}")));
        }

        let id_input = self.in_shadow(&css(selectors::IDENTIFICATION_HOST), selectors::IDENTIFICATION_INPUT)?;
        self.send_keys(&id_input, &form.nit)?;

        match &form.kind {
            CounterpartyKind::Company => self.fill_textfield(selectors::COMPANY_NAME_HOST, &form.name)?,
            CounterpartyKind::Person { first_name, last_name } => {
                self.fill_textfield(selectors::FIRST_NAME_HOST, first_name)?;
                if !last_name.is_empty() {
                    self.fill_textfield(selectors::LAST_NAME_HOST, last_name)?;
                }
            }
        }

        if let Some(code) = &form.regime_code {
            let checkbox = xpath(&format!(r#"//*[text()="{code}"]"#));
            match self.find_once(&Scope::Document, &checkbox) {
                Ok(Some(id)) => self.click(&id)?,
                _ => warn!(code = %code, "No checkbox for tax regime"),
            }
        }

        let save = self.in_shadow(&css(selectors::MODAL_SAVE_HOST), "button")?;
        self.click(&save)
    }

    fn dismiss_popup(&mut self) -> UiResult<()> {
        let close = self.wait_for(&xpath(selectors::POPUP_CLOSE))?;
        self.click(&close)
    }

    fn save(&mut self) -> UiResult<()> {
        let button = self.wait_for(&xpath(selectors::SAVE_BUTTON))?;
        self.click(&button)
    }

    fn wait_for_text(&mut self) -> UiResult<String> {
        let deadline = Instant::now() + self.timeout * 3;
        let mut last = String::new();
        while Instant::now() < deadline {
            if let Some(title) = self.find_once(&Scope::Document, &xpath(selectors::TITLE))? {
                last = self.text(&title)?;
                if last.contains(':') {
                    return Ok(last);
                }
            }
            thread::sleep(POLL_INTERVAL);
        }
        if last.is_empty() {
            Err(UiError::Timeout {
                what: "saved document title".into(),
                secs: (self.timeout * 3).as_secs(),
            })
        } else {
            Ok(last)
        }
    }

    fn close(&mut self) -> UiResult<()> {
        let result = self.command(Method::DELETE, "", None).map(|_| ());
        if let Some(mut child) = self.driver.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
        info!("Browser session closed");
        result
    }
}

impl Drop for WebDriverClient {
    fn drop(&mut self) {
        if let Some(mut child) = self.driver.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_paths() {
        assert_eq!(Scope::Document.path(false), "/element");
        assert_eq!(Scope::Element("e1".into()).path(true), "/element/e1/elements");
        assert_eq!(Scope::Shadow("s1".into()).path(false), "/shadow/s1/element");
    }

    #[test]
    fn test_selector_body() {
        let body = xpath(selectors::SAVE_BUTTON).body();
        assert_eq!(body["using"], "xpath");
        assert_eq!(css("#username").body()["using"], "css selector");
    }

    #[test]
    fn test_every_field_has_a_selector() {
        let fields = [
            FormField::DocumentDate,
            FormField::Counterparty,
            FormField::ExternalPrefix,
            FormField::ExternalConsecutive,
            FormField::CostCenter,
            FormField::LineKind,
            FormField::Product,
            FormField::UnitValue,
            FormField::PaymentAccount,
            FormField::ReferencedDocument,
        ];
        for field in fields {
            assert!(matches!(WebDriverClient::selector_for(field), Selector::XPath(s) if s.starts_with("(//") || s.starts_with("//")));
        }
    }

    #[test]
    fn test_connect_fails_without_driver() {
        let dir = tempfile::tempdir().unwrap();
        let result = WebDriverClient::connect(
            "http://127.0.0.1:9",
            dir.path(),
            Duration::from_millis(600),
        );
        assert!(matches!(result, Err(UiError::Timeout { .. })));
    }
}
