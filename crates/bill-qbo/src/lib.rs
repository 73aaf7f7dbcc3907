//! QuickBooks Online integration for the billing tool.
//!
//! Turns [`InvoiceDraft`]s into QBO invoice payloads and submits them as
//! drafts, and looks up customers and items by name. Access tokens come
//! from the caller or from [`OAuthClient::refresh`]; the interactive
//! authorization flow is not handled here.

mod auth;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use bill_core::{InvoiceDraft, LineItem, Money};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use auth::{OAuthClient, TOKEN_URL, Tokens};

/// Default request timeout for API calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const PRODUCTION_API_URL: &str = "https://quickbooks.api.intuit.com/v3/company";
const SANDBOX_API_URL: &str = "https://sandbox-quickbooks.api.intuit.com/v3/company";
/// Largest page the query endpoint returns.
const CUSTOMER_PAGE_SIZE: usize = 1000;

/// QBO client errors.
#[derive(Debug, Error)]
pub enum QboError {
    /// The access token, realm ID, or OAuth client credentials were unusable.
    #[error("invalid credentials: {reason}")]
    InvalidCredentials { reason: &'static str },
    /// The refresh token was rejected; the company must be reconnected.
    #[error("refresh token is invalid or revoked: {message}")]
    InvalidGrant { message: String },
    /// Failed to build HTTP client.
    #[error("failed to build HTTP client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    /// HTTP request failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    /// API returned a fault.
    #[error("API error: {message}")]
    Api { message: String },
    /// Failed to parse response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Which QuickBooks company API to talk to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Production,
    Sandbox,
}

impl Environment {
    pub const fn base_url(self) -> &'static str {
        match self {
            Self::Production => PRODUCTION_API_URL,
            Self::Sandbox => SANDBOX_API_URL,
        }
    }
}

/// Invoice payment terms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentTerms {
    #[serde(rename = "Net 10")]
    Net10,
    #[default]
    #[serde(rename = "Net 15")]
    Net15,
    #[serde(rename = "Net 30")]
    Net30,
    #[serde(rename = "Net 60")]
    Net60,
    #[serde(rename = "Due on receipt")]
    DueOnReceipt,
}

impl PaymentTerms {
    pub const fn days(self) -> u64 {
        match self {
            Self::Net10 => 10,
            Self::Net15 => 15,
            Self::Net30 => 30,
            Self::Net60 => 60,
            Self::DueOnReceipt => 0,
        }
    }

    /// Due date for an invoice dated `invoice_date`.
    pub fn due_date(self, invoice_date: NaiveDate) -> NaiveDate {
        invoice_date
            .checked_add_days(Days::new(self.days()))
            .unwrap_or(invoice_date)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Net10 => "Net 10",
            Self::Net15 => "Net 15",
            Self::Net30 => "Net 30",
            Self::Net60 => "Net 60",
            Self::DueOnReceipt => "Due on receipt",
        }
    }
}

impl fmt::Display for PaymentTerms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentTerms {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        [
            Self::Net10,
            Self::Net15,
            Self::Net30,
            Self::Net60,
            Self::DueOnReceipt,
        ]
        .into_iter()
        .find(|terms| terms.as_str().eq_ignore_ascii_case(wanted))
        .ok_or_else(|| format!("unknown payment terms: {wanted}"))
    }
}

/// Reference to a QBO product/service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRef {
    pub value: String,
    pub name: String,
}

/// A QBO customer, as needed for mapping job sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Customer {
    pub id: String,
    pub display_name: String,
    pub email: Option<String>,
}

/// Invoice returned by QBO after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedInvoice {
    pub id: String,
    pub doc_number: String,
    pub total: Money,
}

/// Request body for `POST /invoice`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct InvoicePayload {
    pub customer_ref: CustomerRef,
    pub txn_date: NaiveDate,
    pub due_date: NaiveDate,
    pub line: Vec<PayloadLine>,
    pub private_note: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CustomerRef {
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PayloadLine {
    pub line_num: usize,
    pub detail_type: &'static str,
    pub amount: Money,
    pub description: String,
    pub sales_item_line_detail: SalesItemLineDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct SalesItemLineDetail {
    pub qty: f64,
    pub unit_price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_ref: Option<ItemRef>,
}

/// Builds the QBO invoice body for a draft.
///
/// Lines are numbered from 1 in draft order. `item_ref`, when given, is
/// attached to every line.
pub fn build_invoice_payload(
    draft: &InvoiceDraft,
    customer_id: &str,
    item_ref: Option<&ItemRef>,
    terms: PaymentTerms,
) -> InvoicePayload {
    InvoicePayload {
        customer_ref: CustomerRef {
            value: customer_id.to_string(),
        },
        txn_date: draft.invoice_date,
        due_date: terms.due_date(draft.invoice_date),
        line: draft
            .line_items
            .iter()
            .enumerate()
            .map(|(index, item)| payload_line(index + 1, item, item_ref))
            .collect(),
        private_note: format!(
            "Created from LMN export. JobsiteID: {}",
            draft.jobsite_id
        ),
    }
}

fn payload_line(line_num: usize, item: &LineItem, item_ref: Option<&ItemRef>) -> PayloadLine {
    PayloadLine {
        line_num,
        detail_type: "SalesItemLineDetail",
        amount: item.amount,
        description: item.description.clone(),
        sales_item_line_detail: SalesItemLineDetail {
            qty: item.quantity,
            unit_price: item.unit_rate,
            item_ref: item_ref.cloned(),
        },
    }
}

/// QuickBooks Online API client.
///
/// # Thread Safety
///
/// The client is safe to clone and share across threads. Each clone shares
/// the underlying HTTP connection pool.
#[derive(Clone)]
pub struct Client {
    http: reqwest::Client,
    access_token: String,
    realm_id: String,
    base_url: String,
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("access_token", &"[REDACTED]")
            .field("realm_id", &self.realm_id)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Creates a new client for one company.
    ///
    /// # Errors
    ///
    /// Returns an error if the token or realm ID is blank, or if the HTTP
    /// client fails to build.
    pub fn new(
        access_token: impl Into<String>,
        realm_id: impl Into<String>,
        environment: Environment,
    ) -> Result<Self, QboError> {
        Self::with_base_url(access_token, realm_id, environment.base_url())
    }

    /// Creates a client against an explicit API base URL.
    pub fn with_base_url(
        access_token: impl Into<String>,
        realm_id: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Result<Self, QboError> {
        let access_token = access_token.into();
        let realm_id = realm_id.into();

        if access_token.trim().is_empty() {
            return Err(QboError::InvalidCredentials {
                reason: "access token cannot be empty",
            });
        }
        if realm_id.trim().is_empty() {
            return Err(QboError::InvalidCredentials {
                reason: "realm ID cannot be empty",
            });
        }

        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(QboError::ClientBuild)?;

        Ok(Self {
            http,
            access_token,
            realm_id: realm_id.trim().to_string(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn endpoint(&self, resource: &str) -> String {
        format!("{}/{}/{resource}", self.base_url, self.realm_id)
    }

    /// Submits a draft invoice.
    pub async fn create_draft_invoice(
        &self,
        payload: &InvoicePayload,
    ) -> Result<CreatedInvoice, QboError> {
        #[derive(Deserialize)]
        struct Response {
            #[serde(rename = "Invoice")]
            invoice: Created,
        }

        #[derive(Deserialize)]
        struct Created {
            #[serde(rename = "Id")]
            id: String,
            #[serde(rename = "DocNumber", default)]
            doc_number: String,
            #[serde(rename = "TotalAmt", default)]
            total_amt: f64,
        }

        let response = self
            .http
            .post(self.endpoint("invoice"))
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .json(payload)
            .send()
            .await?;

        let body = read_body(response).await?;
        let parsed: Response = serde_json::from_str(&body)
            .map_err(|err| QboError::InvalidResponse(err.to_string()))?;
        tracing::debug!(
            invoice_id = %parsed.invoice.id,
            doc_number = %parsed.invoice.doc_number,
            "created draft invoice"
        );
        Ok(CreatedInvoice {
            id: parsed.invoice.id,
            doc_number: parsed.invoice.doc_number,
            total: Money::from_dollars(parsed.invoice.total_amt),
        })
    }

    /// Looks up a product/service by exact name.
    pub async fn find_item_by_name(&self, name: &str) -> Result<Option<ItemRef>, QboError> {
        let response = self.query(&item_query(name)).await?;
        Ok(response.item.into_iter().next().map(|item| ItemRef {
            value: item.id,
            name: item.name,
        }))
    }

    /// Customers whose display name contains `name`.
    pub async fn search_customers(&self, name: &str) -> Result<Vec<Customer>, QboError> {
        let response = self.query(&customer_search_query(name)).await?;
        tracing::debug!(name, matches = response.customer.len(), "searched customers");
        Ok(response.customer.into_iter().map(Customer::from).collect())
    }

    /// Every customer in the company, fetched page by page.
    pub async fn list_customers(&self) -> Result<Vec<Customer>, QboError> {
        self.list_customers_paged(CUSTOMER_PAGE_SIZE).await
    }

    async fn list_customers_paged(&self, page_size: usize) -> Result<Vec<Customer>, QboError> {
        let mut customers = Vec::new();
        let mut start = 1;
        loop {
            let batch = self
                .query(&customer_page_query(start, page_size))
                .await?
                .customer;
            let fetched = batch.len();
            customers.extend(batch.into_iter().map(Customer::from));
            if fetched < page_size {
                break;
            }
            start += fetched;
        }
        tracing::debug!(count = customers.len(), "listed customers");
        Ok(customers)
    }

    async fn query(&self, statement: &str) -> Result<QueryResponse, QboError> {
        let response = self
            .http
            .get(self.endpoint("query"))
            .bearer_auth(&self.access_token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(&[("query", statement)])
            .send()
            .await?;

        let body = read_body(response).await?;
        let parsed: QueryEnvelope = serde_json::from_str(&body)
            .map_err(|err| QboError::InvalidResponse(err.to_string()))?;
        Ok(parsed.query_response)
    }
}

#[derive(Deserialize)]
struct QueryEnvelope {
    #[serde(rename = "QueryResponse", default)]
    query_response: QueryResponse,
}

#[derive(Deserialize, Default)]
struct QueryResponse {
    #[serde(rename = "Item", default)]
    item: Vec<RawItem>,
    #[serde(rename = "Customer", default)]
    customer: Vec<RawCustomer>,
}

#[derive(Deserialize)]
struct RawItem {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
}

#[derive(Deserialize)]
struct RawCustomer {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "DisplayName", default)]
    display_name: String,
    #[serde(rename = "PrimaryEmailAddr")]
    primary_email_addr: Option<EmailAddress>,
}

#[derive(Deserialize)]
struct EmailAddress {
    #[serde(rename = "Address")]
    address: Option<String>,
}

impl From<RawCustomer> for Customer {
    fn from(raw: RawCustomer) -> Self {
        Self {
            id: raw.id,
            display_name: raw.display_name,
            email: raw
                .primary_email_addr
                .and_then(|email| email.address)
                .filter(|address| !address.is_empty()),
        }
    }
}

async fn read_body(response: reqwest::Response) -> Result<String, QboError> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(parse_api_error(&body).unwrap_or_else(|| QboError::Api {
            message: format!("status {status}: {body}"),
        }));
    }
    Ok(body)
}

/// Escapes a value for a single-quoted query literal.
fn quote(value: &str) -> String {
    value.replace('\'', "\\'")
}

fn item_query(name: &str) -> String {
    format!("SELECT * FROM Item WHERE Name = '{}'", quote(name))
}

fn customer_search_query(name: &str) -> String {
    format!(
        "SELECT * FROM Customer WHERE DisplayName LIKE '%{}%'",
        quote(name)
    )
}

fn customer_page_query(start: usize, page_size: usize) -> String {
    format!("SELECT * FROM Customer STARTPOSITION {start} MAXRESULTS {page_size}")
}

fn parse_api_error(body: &str) -> Option<QboError> {
    #[derive(Deserialize)]
    struct ErrorPayload {
        #[serde(rename = "Fault")]
        fault: Fault,
    }

    #[derive(Deserialize)]
    struct Fault {
        #[serde(rename = "Error", default)]
        error: Vec<FaultError>,
    }

    #[derive(Deserialize)]
    struct FaultError {
        #[serde(rename = "Message")]
        message: Option<String>,
        #[serde(rename = "Detail")]
        detail: Option<String>,
    }

    let payload = serde_json::from_str::<ErrorPayload>(body).ok()?;
    let first = payload.fault.error.into_iter().next()?;
    first
        .detail
        .or(first.message)
        .map(|message| QboError::Api { message })
}
