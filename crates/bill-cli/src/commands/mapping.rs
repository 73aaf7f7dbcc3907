//! Mapping commands: bootstrap the mapping file and manage overrides.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result, bail};
use bill_db::CustomerOverride;
use bill_qbo::{Client, Customer};
use clap::Subcommand;

use super::util::{connect, open_database, resolve_mapping, runtime, truncate};
use crate::Config;
use crate::lmn;
use crate::mapping::{CustomerMapping, write_customer_export, write_mapping_template};

#[derive(Debug, Subcommand)]
pub enum MappingAction {
    /// Write a mapping template listing every job site in a time export.
    Template {
        /// LMN time data export (CSV).
        #[arg(long)]
        time: PathBuf,

        /// Output path. Defaults to the configured mapping file.
        #[arg(long)]
        out: Option<PathBuf>,

        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },

    /// List resolved mappings (file plus overrides).
    List,

    /// Map a job site to a customer, overriding the mapping file.
    Set {
        jobsite_id: String,
        customer_id: String,

        /// Customer display name.
        #[arg(long)]
        name: Option<String>,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Remove a job site override.
    Remove { jobsite_id: String },

    /// Search QuickBooks customers by display name.
    Search {
        /// Part of the customer's display name.
        name: String,
    },

    /// Export every QuickBooks customer to a CSV for building the mapping.
    ExportCustomers {
        /// Output path.
        #[arg(long, default_value = "qbo_customers.csv")]
        out: PathBuf,
    },
}

pub fn run<W: Write>(writer: &mut W, action: &MappingAction, config: &Config) -> Result<()> {
    match action {
        MappingAction::Template { time, out, force } => {
            let out = out.as_ref().unwrap_or(&config.mapping_path);
            if out.exists() && !force {
                bail!(
                    "{} already exists; pass --force to overwrite",
                    out.display()
                );
            }
            let records = lmn::load_time_records(time)
                .with_context(|| format!("failed to read time export {}", time.display()))?;
            let written = write_mapping_template(
                records.iter().map(|record| record.jobsite_id.as_str()),
                out,
            )?;
            writeln!(
                writer,
                "Wrote {written} job sites to {}",
                out.display()
            )?;
        }
        MappingAction::List => {
            let db = open_database(config)?;
            let overridden: HashSet<String> = db
                .customer_overrides()?
                .into_iter()
                .map(|o| o.jobsite_id)
                .collect();
            let mapping = resolve_mapping(&db, config)?;
            write!(writer, "{}", format_mappings(&mapping, &overridden))?;
        }
        MappingAction::Set {
            jobsite_id,
            customer_id,
            name,
            notes,
        } => {
            let jobsite_id = jobsite_id.trim();
            let customer_id = customer_id.trim();
            if jobsite_id.is_empty() || customer_id.is_empty() {
                bail!("jobsite and customer IDs cannot be empty");
            }
            let mut db = open_database(config)?;
            let previous = db.customer_override(jobsite_id)?;
            db.save_customer_override(&CustomerOverride {
                jobsite_id: jobsite_id.to_string(),
                qbo_customer_id: customer_id.to_string(),
                qbo_display_name: name.clone().unwrap_or_default(),
                notes: notes.clone().unwrap_or_default(),
            })?;
            match previous {
                Some(previous) if previous.qbo_customer_id != customer_id => writeln!(
                    writer,
                    "Mapped {jobsite_id} to customer {customer_id} (was {})",
                    previous.qbo_customer_id
                )?,
                _ => writeln!(writer, "Mapped {jobsite_id} to customer {customer_id}")?,
            }
        }
        MappingAction::Remove { jobsite_id } => {
            let mut db = open_database(config)?;
            match db.customer_override(jobsite_id)? {
                Some(previous) => {
                    db.delete_customer_override(jobsite_id)?;
                    writeln!(
                        writer,
                        "Removed override for {jobsite_id} (customer {})",
                        previous.qbo_customer_id
                    )?;
                }
                None => writeln!(writer, "No override for {jobsite_id}")?,
            }
        }
        MappingAction::Search { name } => {
            let mut db = open_database(config)?;
            runtime()?.block_on(async {
                let client = connect(&mut db, config).await?;
                search_customers(writer, &client, name).await
            })?;
        }
        MappingAction::ExportCustomers { out } => {
            let mut db = open_database(config)?;
            runtime()?.block_on(async {
                let client = connect(&mut db, config).await?;
                export_customers(writer, &client, out).await
            })?;
        }
    }
    Ok(())
}

/// Prints customers whose display name contains `name`.
pub async fn search_customers<W: Write>(writer: &mut W, client: &Client, name: &str) -> Result<()> {
    let customers = client
        .search_customers(name)
        .await
        .context("customer search failed")?;
    write!(writer, "{}", format_customers(&customers))?;
    Ok(())
}

/// Writes every customer to `out` as `QBO_CustomerID,DisplayName,Email`.
pub async fn export_customers<W: Write>(
    writer: &mut W,
    client: &Client,
    out: &std::path::Path,
) -> Result<()> {
    let customers = client
        .list_customers()
        .await
        .context("failed to list customers")?;
    let written = write_customer_export(&customers, out)?;
    writeln!(writer, "Exported {written} customers to {}", out.display())?;
    Ok(())
}

/// Format customer search results for human-readable output.
pub fn format_customers(customers: &[Customer]) -> String {
    let mut output = String::new();

    if customers.is_empty() {
        writeln!(output, "No matching customers.").unwrap();
        return output;
    }

    writeln!(output, "{:<10}  {:<32}  Email", "Customer", "Name").unwrap();
    writeln!(
        output,
        "──────────  ────────────────────────────────  ────────────────────"
    )
    .unwrap();
    for customer in customers {
        let row = format!(
            "{:<10}  {:<32}  {}",
            truncate(&customer.id, 10),
            truncate(&customer.display_name, 32),
            customer.email.as_deref().unwrap_or("")
        );
        writeln!(output, "{}", row.trim_end()).unwrap();
    }
    output
}

/// Format resolved mappings for human-readable output.
pub fn format_mappings(mapping: &CustomerMapping, overridden: &HashSet<String>) -> String {
    let mut output = String::new();

    if mapping.is_empty() {
        writeln!(output, "No customer mappings.").unwrap();
        writeln!(output).unwrap();
        writeln!(
            output,
            "Hint: Run 'bill mapping template --time <csv>' and fill in QBO_CustomerID."
        )
        .unwrap();
        return output;
    }

    writeln!(
        output,
        "{:<12}  {:<10}  {:<8}  Name",
        "Jobsite", "Customer", "Source"
    )
    .unwrap();
    writeln!(
        output,
        "────────────  ──────────  ────────  ────────────────────"
    )
    .unwrap();
    for entry in mapping.entries() {
        let source = if overridden.contains(&entry.jobsite_id) {
            "override"
        } else {
            "file"
        };
        writeln!(
            output,
            "{:<12}  {:<10}  {:<8}  {}",
            truncate(&entry.jobsite_id, 12),
            truncate(&entry.qbo_customer_id, 10),
            source,
            entry.qbo_display_name
        )
        .unwrap();
    }
    output
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use insta::assert_snapshot;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config_in(dir: &std::path::Path) -> Config {
        Config {
            database_path: dir.join("bill.db"),
            mapping_path: dir.join("customer_mapping.csv"),
            ..Config::default()
        }
    }

    fn run_to_string(action: &MappingAction, config: &Config) -> String {
        let mut out = Vec::new();
        run(&mut out, action, config).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn set_list_remove_roundtrip() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        fs::write(
            &config.mapping_path,
            "JobsiteID,QBO_CustomerID,QBO_DisplayName,Notes\nJ100,42,Acme HOA,\nJ200,57,Oak Row LLC,\n",
        )
        .unwrap();

        let set = MappingAction::Set {
            jobsite_id: "J100".to_string(),
            customer_id: "99".to_string(),
            name: Some("Acme Parent".to_string()),
            notes: None,
        };
        assert_eq!(run_to_string(&set, &config), "Mapped J100 to customer 99\n");
        let reset = MappingAction::Set {
            jobsite_id: "J100".to_string(),
            customer_id: "98".to_string(),
            name: Some("Acme Parent".to_string()),
            notes: None,
        };
        assert_eq!(
            run_to_string(&reset, &config),
            "Mapped J100 to customer 98 (was 99)\n"
        );
        assert_eq!(run_to_string(&set, &config), "Mapped J100 to customer 99 (was 98)\n");

        assert_snapshot!(run_to_string(&MappingAction::List, &config), @r"
        Jobsite       Customer    Source    Name
        ────────────  ──────────  ────────  ────────────────────
        J100          99          override  Acme Parent
        J200          57          file      Oak Row LLC
        ");

        let remove = MappingAction::Remove {
            jobsite_id: "J100".to_string(),
        };
        assert_eq!(
            run_to_string(&remove, &config),
            "Removed override for J100 (customer 99)\n"
        );
        assert_eq!(run_to_string(&remove, &config), "No override for J100\n");
    }

    #[test]
    fn list_without_mappings_shows_hint() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());

        assert_snapshot!(run_to_string(&MappingAction::List, &config), @r"
        No customer mappings.

        Hint: Run 'bill mapping template --time <csv>' and fill in QBO_CustomerID.
        ");
    }

    #[test]
    fn template_refuses_to_overwrite() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        let time = temp.path().join("time.csv");
        fs::write(
            &time,
            "TimesheetID,JobsiteID,Jobsite,CustomerName,TaskName,CostCode,Man Hours,Billable Rate,EndDate\n\
             1,J200,Oak Row,Oak Row LLC,Task,200,1,20,2026-01-05\n\
             1,J100,Maple Court,Acme HOA,Task,200,1,20,2026-01-05\n",
        )
        .unwrap();
        let template = MappingAction::Template {
            time,
            out: None,
            force: false,
        };

        let output = run_to_string(&template, &config);
        assert_eq!(
            output,
            format!("Wrote 2 job sites to {}\n", config.mapping_path.display())
        );

        let mut sink = Vec::new();
        let err = run(&mut sink, &template, &config).unwrap_err();
        assert!(err.to_string().contains("already exists"));
    }

    #[test]
    fn set_rejects_blank_ids() {
        let temp = tempfile::tempdir().unwrap();
        let config = config_in(temp.path());
        let set = MappingAction::Set {
            jobsite_id: "J100".to_string(),
            customer_id: "  ".to_string(),
            name: None,
            notes: None,
        };

        let mut sink = Vec::new();
        assert!(run(&mut sink, &set, &config).is_err());
    }

    async fn customer_server(query: &str, customers: serde_json::Value) -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v3/company/9130/query"))
            .and(query_param("query", query))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"QueryResponse": {"Customer": customers}})),
            )
            .expect(1)
            .mount(&server)
            .await;
        server
    }

    fn client_for(server: &MockServer) -> Client {
        Client::with_base_url("token", "9130", format!("{}/v3/company", server.uri())).unwrap()
    }

    #[tokio::test]
    async fn search_prints_matching_customers() {
        let server = customer_server(
            "SELECT * FROM Customer WHERE DisplayName LIKE '%Acme%'",
            json!([
                {"Id": "42", "DisplayName": "Acme HOA", "PrimaryEmailAddr": {"Address": "board@acme-hoa.example"}},
                {"Id": "43", "DisplayName": "Acme HOA:Clubhouse"}
            ]),
        )
        .await;

        let mut out = Vec::new();
        search_customers(&mut out, &client_for(&server), "Acme")
            .await
            .unwrap();

        assert_snapshot!(String::from_utf8(out).unwrap(), @r"
        Customer    Name                              Email
        ──────────  ────────────────────────────────  ────────────────────
        42          Acme HOA                          board@acme-hoa.example
        43          Acme HOA:Clubhouse
        ");
    }

    #[test]
    fn no_matching_customers() {
        assert_eq!(format_customers(&[]), "No matching customers.\n");
    }

    #[tokio::test]
    async fn export_writes_customer_csv() {
        let server = customer_server(
            "SELECT * FROM Customer STARTPOSITION 1 MAXRESULTS 1000",
            json!([
                {"Id": "42", "DisplayName": "Acme HOA", "PrimaryEmailAddr": {"Address": "board@acme-hoa.example"}},
                {"Id": "57", "DisplayName": "Oak Row, LLC"}
            ]),
        )
        .await;
        let temp = tempfile::tempdir().unwrap();
        let out_path = temp.path().join("customers.csv");

        let mut out = Vec::new();
        export_customers(&mut out, &client_for(&server), &out_path)
            .await
            .unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            format!("Exported 2 customers to {}\n", out_path.display())
        );
        assert_snapshot!(fs::read_to_string(&out_path).unwrap(), @r#"
        QBO_CustomerID,DisplayName,Email
        42,Acme HOA,board@acme-hoa.example
        57,"Oak Row, LLC",
        "#);
    }
}
