//! Configuration loading and management.

use std::fmt;
use std::path::{Path, PathBuf};

use bill_core::{
    BillingConfig, BillingError, CostClassifier, DEFAULT_FEE_LABEL, DEFAULT_LABOR_LABEL,
    DEFAULT_OVERHEAD_CODE, InvoicePolicy,
};
use bill_qbo::{Environment, PaymentTerms};
use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};

/// Application configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Path to the database file.
    pub database_path: PathBuf,
    /// Path to the jobsite → customer mapping CSV.
    pub mapping_path: PathBuf,
    pub invoice: InvoiceSettings,
    pub qbo: QboSettings,
}

/// Invoice wording and drive-time classification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSettings {
    /// Cost codes containing this marker are drive time.
    pub overhead_code: String,
    pub labor_label: String,
    pub fee_label: String,
}

impl Default for InvoiceSettings {
    fn default() -> Self {
        Self {
            overhead_code: DEFAULT_OVERHEAD_CODE.to_string(),
            labor_label: DEFAULT_LABOR_LABEL.to_string(),
            fee_label: DEFAULT_FEE_LABEL.to_string(),
        }
    }
}

/// QuickBooks Online connection settings.
///
/// Either set `access_token` directly, or set `client_id`, `client_secret`
/// and `refresh_token` so access tokens are refreshed and stored in the
/// database as they expire.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct QboSettings {
    pub environment: Environment,
    pub realm_id: String,
    pub access_token: String,
    pub refresh_token: String,
    pub client_id: String,
    pub client_secret: String,
    pub payment_terms: PaymentTerms,
    /// Product/service attached to every invoice line, looked up by name.
    pub labor_item_name: Option<String>,
}

impl QboSettings {
    /// Whether app credentials for token refresh are configured.
    pub fn can_refresh(&self) -> bool {
        !self.client_id.trim().is_empty() && !self.client_secret.trim().is_empty()
    }
}

fn redacted(secret: &str) -> &'static str {
    if secret.is_empty() {
        "[UNSET]"
    } else {
        "[REDACTED]"
    }
}

impl fmt::Debug for QboSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QboSettings")
            .field("environment", &self.environment)
            .field("realm_id", &self.realm_id)
            .field("access_token", &redacted(&self.access_token))
            .field("refresh_token", &redacted(&self.refresh_token))
            .field("client_id", &self.client_id)
            .field("client_secret", &redacted(&self.client_secret))
            .field("payment_terms", &self.payment_terms)
            .field("labor_item_name", &self.labor_item_name)
            .finish()
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_path", &self.database_path)
            .field("mapping_path", &self.mapping_path)
            .field("invoice", &self.invoice)
            .field("qbo", &self.qbo)
            .finish()
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs_data_path().unwrap_or_else(|| PathBuf::from("."));
        Self {
            database_path: data_dir.join("bill.db"),
            mapping_path: data_dir.join("customer_mapping.csv"),
            invoice: InvoiceSettings::default(),
            qbo: QboSettings::default(),
        }
    }
}

impl Config {
    /// Loads configuration, optionally from a specific file.
    #[expect(
        clippy::result_large_err,
        reason = "figment::Error is large but only returned at startup"
    )]
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        // Load from default config location
        if let Some(config_dir) = dirs_config_path() {
            figment = figment.merge(Toml::file(config_dir.join("config.toml")));
        }

        // Load from specified config file
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }

        // Load from environment variables (BILL_*, nested keys split on `__`)
        figment = figment.merge(Env::prefixed("BILL_").split("__"));

        figment.extract()
    }

    /// Engine settings derived from the `invoice` table.
    ///
    /// Fails when `invoice.overhead_code` is blank.
    pub fn billing_config(&self) -> Result<BillingConfig, BillingError> {
        Ok(BillingConfig {
            classifier: CostClassifier::new(self.invoice.overhead_code.clone())?,
            policy: InvoicePolicy {
                labor_label: self.invoice.labor_label.clone(),
                fee_label: self.invoice.fee_label.clone(),
                ..InvoicePolicy::default()
            },
        })
    }
}

/// Returns the platform-specific config directory for bill.
fn dirs_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("bill"))
}

/// Returns the platform-specific data directory for bill.
///
/// On Linux: `~/.local/share/bill`
pub fn dirs_data_path() -> Option<PathBuf> {
    dirs::data_dir().map(|p| p.join("bill"))
}
