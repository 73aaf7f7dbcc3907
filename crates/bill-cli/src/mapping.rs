//! Jobsite → QuickBooks customer mapping.
//!
//! The base mapping is a CSV file (`JobsiteID,QBO_CustomerID,QBO_DisplayName,Notes`).
//! Overrides saved in the database replace file entries for the same job site.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use bill_db::CustomerOverride;
use bill_qbo::Customer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const HEADER: [&str; 4] = ["JobsiteID", "QBO_CustomerID", "QBO_DisplayName", "Notes"];
const CUSTOMER_EXPORT_HEADER: [&str; 3] = ["QBO_CustomerID", "DisplayName", "Email"];

#[derive(Debug, Error)]
pub enum MappingError {
    #[error("failed to access {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid mapping file {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
}

/// One mapped customer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerEntry {
    #[serde(rename = "JobsiteID")]
    pub jobsite_id: String,
    #[serde(rename = "QBO_CustomerID")]
    pub qbo_customer_id: String,
    #[serde(rename = "QBO_DisplayName", default)]
    pub qbo_display_name: String,
    #[serde(rename = "Notes", default)]
    pub notes: String,
}

impl From<CustomerOverride> for CustomerEntry {
    fn from(value: CustomerOverride) -> Self {
        Self {
            jobsite_id: value.jobsite_id,
            qbo_customer_id: value.qbo_customer_id,
            qbo_display_name: value.qbo_display_name,
            notes: value.notes,
        }
    }
}

/// Resolved mapping keyed by job site ID.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CustomerMapping {
    entries: HashMap<String, CustomerEntry>,
}

impl CustomerMapping {
    pub fn get(&self, jobsite_id: &str) -> Option<&CustomerEntry> {
        self.entries.get(jobsite_id)
    }

    pub fn customer_id(&self, jobsite_id: &str) -> Option<&str> {
        self.get(jobsite_id).map(|entry| entry.qbo_customer_id.as_str())
    }

    /// All entries ordered by job site ID.
    pub fn entries(&self) -> Vec<&CustomerEntry> {
        let mut entries: Vec<&CustomerEntry> = self.entries.values().collect();
        entries.sort_by(|a, b| a.jobsite_id.cmp(&b.jobsite_id));
        entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Inserts or replaces an entry. Entries without a customer ID are dropped.
    pub fn insert(&mut self, entry: CustomerEntry) {
        if entry.qbo_customer_id.trim().is_empty() {
            return;
        }
        self.entries.insert(entry.jobsite_id.clone(), entry);
    }

    /// Applies database overrides on top of the file mapping.
    #[must_use]
    pub fn with_overrides(mut self, overrides: impl IntoIterator<Item = CustomerOverride>) -> Self {
        for mapping in overrides {
            self.insert(mapping.into());
        }
        self
    }
}

/// Loads the mapping CSV. A missing file is an empty mapping.
pub fn load_mapping(path: &Path) -> Result<CustomerMapping, MappingError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no mapping file");
        return Ok(CustomerMapping::default());
    }
    let csv_error = |source| MappingError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_path(path)
        .map_err(csv_error)?;

    let mut mapping = CustomerMapping::default();
    for row in reader.deserialize::<CustomerEntry>() {
        mapping.insert(row.map_err(csv_error)?);
    }
    tracing::debug!(entries = mapping.len(), "loaded customer mapping");
    Ok(mapping)
}

/// Writes a template with one blank row per unique job site, sorted.
///
/// Returns the number of rows written.
pub fn write_mapping_template<'a>(
    jobsite_ids: impl IntoIterator<Item = &'a str>,
    path: &Path,
) -> Result<usize, MappingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| MappingError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let unique: BTreeSet<&str> = jobsite_ids.into_iter().collect();

    let csv_error = |source| MappingError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    writer.write_record(HEADER).map_err(csv_error)?;
    for jobsite_id in &unique {
        writer
            .write_record([*jobsite_id, "", "", ""])
            .map_err(csv_error)?;
    }
    writer.flush().map_err(|source| MappingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(unique.len())
}

/// Writes accounting customers as a lookup sheet for filling in the mapping.
///
/// Returns the number of rows written.
pub fn write_customer_export(customers: &[Customer], path: &Path) -> Result<usize, MappingError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| MappingError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let csv_error = |source| MappingError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_error)?;
    writer
        .write_record(CUSTOMER_EXPORT_HEADER)
        .map_err(csv_error)?;
    for customer in customers {
        writer
            .write_record([
                customer.id.as_str(),
                customer.display_name.as_str(),
                customer.email.as_deref().unwrap_or(""),
            ])
            .map_err(csv_error)?;
    }
    writer.flush().map_err(|source| MappingError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(customers.len())
}

/// Distinct job sites with no customer, in first-seen order.
pub fn unmapped_jobsites<'a>(
    jobsite_ids: impl IntoIterator<Item = &'a str>,
    mapping: &CustomerMapping,
) -> Vec<&'a str> {
    let mut seen = BTreeSet::new();
    jobsite_ids
        .into_iter()
        .filter(|id| mapping.get(id).is_none() && seen.insert(*id))
        .collect()
}
