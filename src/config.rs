use crate::error::{BotError, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};
use tracing::{info, warn};

pub const CONFIG_FILE: &str = "config/config.json";
pub const CREDENTIALS_FILE: &str = "config/credenciales.json";
pub const CLIENTS_FILE: &str = "config/configuracion_usuarios.json";

#[derive(Debug, Deserialize)]
pub struct Config {
    pub paths: Paths,
    pub urls: Urls,
    #[serde(rename = "correos", default)]
    pub recipients: Vec<String>,
    #[serde(rename = "tipo_documento_excluir", default)]
    pub excluded_document_types: Vec<String>,
    #[serde(default)]
    pub validation: Validation,
    #[serde(rename = "ejecucion", default)]
    pub run: RunSettings,
    #[serde(default)]
    pub smtp: Option<SmtpSettings>,
    /// Command used by the retrieval stage, `{cufe}` and `{downloads}` are substituted.
    #[serde(rename = "comando_descarga", default)]
    pub retrieval_command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
pub struct Paths {
    pub inputs: PathBuf,
    pub output: PathBuf,
    pub pdf: PathBuf,
    pub config: PathBuf,
    pub web_driver: PathBuf,
    pub downloads: PathBuf,
    #[serde(default)]
    pub tesseract: Option<PathBuf>,
    #[serde(rename = "origen_folder", default)]
    pub origin: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct Urls {
    pub main: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct Validation {
    #[serde(default)]
    pub check_paths: bool,
}

#[derive(Debug, Deserialize)]
pub struct RunSettings {
    #[serde(rename = "tamano_lote", default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(rename = "ejecuciones_maximas", default = "default_max_passes")]
    pub max_passes: usize,
    #[serde(rename = "pausa_entre_lotes_seg", default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(rename = "timeout_elemento_seg", default = "default_element_timeout_secs")]
    pub element_timeout_secs: u64,
    #[serde(rename = "webdriver_puerto", default = "default_webdriver_port")]
    pub webdriver_port: u16,
}

fn default_batch_size() -> usize {
    5
}

fn default_max_passes() -> usize {
    3
}

fn default_cooldown_secs() -> u64 {
    300
}

fn default_element_timeout_secs() -> u64 {
    10
}

fn default_webdriver_port() -> u16 {
    9515
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_passes: default_max_passes(),
            cooldown_secs: default_cooldown_secs(),
            element_timeout_secs: default_element_timeout_secs(),
            webdriver_port: default_webdriver_port(),
        }
    }
}

impl RunSettings {
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }

    pub fn element_timeout(&self) -> Duration {
        Duration::from_secs(self.element_timeout_secs)
    }
}

/// SMTP relay settings. Username and password come from the environment.
#[derive(Debug, Deserialize)]
pub struct SmtpSettings {
    pub server: String,
    #[serde(default = "default_sender")]
    pub from: String,
}

fn default_sender() -> String {
    "bot@localhost".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    #[serde(rename = "usuario")]
    pub username: String,
    #[serde(rename = "contrasena")]
    pub password: String,
}

/// Per-client business rules, keyed by client NIT.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientRules {
    #[serde(rename = "nombre")]
    pub name: String,
    #[serde(rename = "centro de costo")]
    pub cost_center: String,
    /// Label of the tax option, e.g. "IVA 19".
    #[serde(rename = "iva")]
    pub tax_rate: String,
    #[serde(rename = "codigo_iva")]
    pub tax_product_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CostCenterPolicy {
    Fixed(String),
    Blank,
    FromRow,
}

impl ClientRules {
    pub fn cost_center_policy(&self) -> CostCenterPolicy {
        match self.cost_center.as_str() {
            "nulo" => CostCenterPolicy::Blank,
            "varios" => CostCenterPolicy::FromRow,
            fixed => CostCenterPolicy::Fixed(fixed.to_string()),
        }
    }

    /// Cost center to post for a row whose spreadsheet cost center is `row_value`.
    pub fn resolve_cost_center(&self, row_value: &str) -> String {
        match self.cost_center_policy() {
            CostCenterPolicy::Fixed(v) => v,
            CostCenterPolicy::Blank => String::new(),
            CostCenterPolicy::FromRow => row_value.to_string(),
        }
    }
}

/// Everything loaded once per run.
pub struct Settings {
    pub base_dir: PathBuf,
    pub config: Config,
    pub credentials: HashMap<String, Credentials>,
    pub clients: HashMap<String, ClientRules>,
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Ok(serde_json::from_str(&read_required(path.as_ref())?)?)
    }

    /// Rewrite every relative path against `base_dir`.
    pub fn resolve_paths(&mut self, base_dir: &Path) {
        let p = &mut self.paths;
        for path in [
            &mut p.inputs,
            &mut p.output,
            &mut p.pdf,
            &mut p.config,
            &mut p.web_driver,
            &mut p.downloads,
        ] {
            absolutize(path, base_dir);
        }
        for path in [&mut p.tesseract, &mut p.origin].into_iter().flatten() {
            absolutize(path, base_dir);
        }
    }

    pub fn warn_missing_paths(&self) {
        let p = &self.paths;
        for path in [&p.inputs, &p.output, &p.pdf, &p.config, &p.web_driver, &p.downloads] {
            if !path.exists() {
                warn!(path = %path.display(), "Configured path does not exist");
            }
        }
    }
}

fn absolutize(path: &mut PathBuf, base_dir: &Path) {
    if path.is_relative() {
        *path = base_dir.join(&*path);
        info!(path = %path.display(), "Resolved relative path");
    }
}

fn read_required(path: &Path) -> Result<String> {
    if !path.exists() {
        return Err(BotError::MissingFile(path.to_path_buf()));
    }
    Ok(fs::read_to_string(path)?)
}

impl Settings {
    pub fn load(base_dir: impl AsRef<Path>) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        let mut config = Config::load(base_dir.join(CONFIG_FILE))?;
        config.resolve_paths(&base_dir);
        if config.validation.check_paths {
            config.warn_missing_paths();
        }
        if config.run.batch_size == 0 {
            return Err(BotError::Config("tamano_lote must be at least 1".into()));
        }

        let credentials = serde_json::from_str(&read_required(&base_dir.join(CREDENTIALS_FILE))?)?;
        let clients = serde_json::from_str(&read_required(&base_dir.join(CLIENTS_FILE))?)?;

        Ok(Self {
            base_dir,
            config,
            credentials,
            clients,
        })
    }

    pub fn credentials_for(&self, client_nit: &str) -> Result<&Credentials> {
        self.credentials
            .get(client_nit)
            .ok_or_else(|| BotError::Config(format!("no credentials for client {client_nit}")))
    }

    pub fn client_rules(&self, client_nit: &str) -> Option<&ClientRules> {
        let rules = self.clients.get(client_nit);
        if rules.is_none() {
            warn!(client = %client_nit, "Client NIT missing from client configuration");
        }
        rules
    }

    pub fn progress_file(&self) -> PathBuf {
        self.config.paths.config.join("progreso.json")
    }
}
