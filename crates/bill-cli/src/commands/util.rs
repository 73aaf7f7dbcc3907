//! Shared utilities for CLI commands.

use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bill_core::{InvoiceDraft, ServiceRecord, TimeRecord, build_invoices};
use bill_db::{Database, StoredTokens};
use bill_qbo::{Client, OAuthClient, Tokens};
use chrono::{DateTime, Local, NaiveDate, Utc};
use clap::Args;

use crate::Config;
use crate::config::QboSettings;
use crate::lmn;
use crate::mapping::{CustomerMapping, load_mapping};

/// The export pair every billing run reads.
#[derive(Debug, Clone, Args)]
pub struct ExportArgs {
    /// LMN time data export (CSV).
    #[arg(long)]
    pub time: PathBuf,

    /// LMN service data export (CSV).
    #[arg(long)]
    pub services: PathBuf,

    /// Invoice date (YYYY-MM-DD). Defaults to today.
    #[arg(long)]
    pub date: Option<NaiveDate>,
}

impl ExportArgs {
    pub fn invoice_date(&self) -> NaiveDate {
        self.date.unwrap_or_else(|| Local::now().date_naive())
    }
}

/// Both exports, parsed.
#[derive(Debug)]
pub struct Exports {
    pub time: Vec<TimeRecord>,
    pub services: Vec<ServiceRecord>,
}

pub fn load_exports(args: &ExportArgs) -> Result<Exports> {
    let time = lmn::load_time_records(&args.time)
        .with_context(|| format!("failed to read time export {}", args.time.display()))?;
    let services = lmn::load_service_records(&args.services)
        .with_context(|| format!("failed to read service export {}", args.services.display()))?;
    tracing::debug!(
        time_rows = time.len(),
        service_rows = services.len(),
        "loaded exports"
    );
    Ok(Exports { time, services })
}

/// Reads both exports and assembles the run's invoices.
pub fn load_drafts(args: &ExportArgs, config: &Config) -> Result<Vec<InvoiceDraft>> {
    let billing = config
        .billing_config()
        .context("invalid [invoice] settings")?;
    let exports = load_exports(args)?;
    build_invoices(&exports.time, &exports.services, args.invoice_date(), &billing)
    .context("failed to build invoices")
}

/// Opens the database, creating its directory if needed.
pub fn open_database(config: &Config) -> Result<Database> {
    if let Some(parent) = config.database_path.parent() {
        std::fs::create_dir_all(parent).context("failed to create database directory")?;
    }
    Database::open(&config.database_path)
        .with_context(|| format!("failed to open {}", config.database_path.display()))
}

/// File mapping with database overrides applied.
pub fn resolve_mapping(db: &Database, config: &Config) -> Result<CustomerMapping> {
    let mapping = load_mapping(&config.mapping_path)
        .with_context(|| format!("failed to load {}", config.mapping_path.display()))?;
    let overrides = db.customer_overrides()?;
    Ok(mapping.with_overrides(overrides))
}

/// Runtime for the commands that talk to QuickBooks.
pub fn runtime() -> Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
}

/// QuickBooks client for the configured company.
pub async fn connect(db: &mut Database, config: &Config) -> Result<Client> {
    let oauth = if config.qbo.can_refresh() {
        Some(OAuthClient::new(
            config.qbo.client_id.clone(),
            config.qbo.client_secret.clone(),
        )?)
    } else {
        None
    };
    let access_token = access_token(db, &config.qbo, oauth.as_ref(), Utc::now()).await?;
    Client::new(
        access_token,
        config.qbo.realm_id.clone(),
        config.qbo.environment,
    )
    .context("QuickBooks credentials are not configured (qbo.access_token, qbo.realm_id)")
}

/// Picks the access token for this run.
///
/// A stored token that has not expired wins. Otherwise, when app
/// credentials are configured, the stored (or configured) refresh token is
/// exchanged and the new pair saved. Without app credentials the configured
/// `access_token` is used as-is.
pub async fn access_token(
    db: &mut Database,
    qbo: &QboSettings,
    oauth: Option<&OAuthClient>,
    now: DateTime<Utc>,
) -> Result<String> {
    let stored = db.tokens(&qbo.realm_id)?.map(into_tokens);
    if let Some(tokens) = stored.as_ref().filter(|t| t.access_token_fresh(now)) {
        tracing::debug!("using stored access token");
        return Ok(tokens.access_token.clone());
    }

    let Some(oauth) = oauth else {
        return Ok(qbo.access_token.clone());
    };

    let refresh_token = match stored {
        Some(tokens) if !tokens.refresh_token_expired(now) => tokens.refresh_token,
        _ if !qbo.refresh_token.trim().is_empty() => qbo.refresh_token.trim().to_string(),
        Some(_) => bail!("stored refresh token has expired; set a new qbo.refresh_token"),
        None => bail!("no refresh token; set qbo.refresh_token"),
    };

    let tokens = oauth
        .refresh(&refresh_token, now)
        .await
        .context("failed to refresh QuickBooks access token")?;
    db.save_tokens(&StoredTokens {
        realm_id: qbo.realm_id.clone(),
        access_token: tokens.access_token.clone(),
        refresh_token: tokens.refresh_token.clone(),
        expires_at: tokens.expires_at,
        refresh_expires_at: tokens.refresh_expires_at,
    })?;
    tracing::info!(expires_at = %tokens.expires_at, "refreshed QuickBooks access token");
    Ok(tokens.access_token)
}

fn into_tokens(stored: StoredTokens) -> Tokens {
    Tokens {
        access_token: stored.access_token,
        refresh_token: stored.refresh_token,
        expires_at: stored.expires_at,
        refresh_expires_at: stored.refresh_expires_at,
    }
}

/// Truncates by characters, appending `...` when shortened.
pub fn truncate(text: &str, width: usize) -> String {
    if text.chars().count() > width {
        let kept: String = text.chars().take(width.saturating_sub(3)).collect();
        format!("{kept}...")
    } else {
        text.to_string()
    }
}
