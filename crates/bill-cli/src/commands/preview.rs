//! Preview command: render the invoices an export pair would produce.
//!
//! Nothing is written anywhere; this is the dry look before `bill process`.

use std::fmt::Write as _;
use std::io::Write;

use anyhow::Result;
use bill_core::{InvoiceDraft, Money};
use clap::Args;

use super::util::{ExportArgs, load_drafts};
use crate::Config;

#[derive(Debug, Args)]
pub struct PreviewArgs {
    #[command(flatten)]
    pub inputs: ExportArgs,

    /// Output as JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run<W: Write>(writer: &mut W, args: &PreviewArgs, config: &Config) -> Result<()> {
    let drafts = load_drafts(&args.inputs, config)?;
    if args.json {
        writeln!(writer, "{}", serde_json::to_string_pretty(&drafts)?)?;
    } else {
        write!(writer, "{}", format_preview(&drafts))?;
    }
    Ok(())
}

/// Format invoices for human-readable output.
pub fn format_preview(drafts: &[InvoiceDraft]) -> String {
    let mut output = String::new();

    let Some(first) = drafts.first() else {
        writeln!(output, "No invoices to create.").unwrap();
        return output;
    };
    writeln!(output, "INVOICE PREVIEW: {}", first.invoice_date).unwrap();
    writeln!(output).unwrap();

    for draft in drafts {
        write_invoice(&mut output, draft);
        writeln!(output).unwrap();
    }

    let total: Money = drafts.iter().map(|draft| draft.total).sum();
    writeln!(
        output,
        "{} {}, total {total}",
        drafts.len(),
        if drafts.len() == 1 { "invoice" } else { "invoices" }
    )
    .unwrap();
    output
}

fn write_invoice(output: &mut String, draft: &InvoiceDraft) {
    writeln!(output, "{}  {}", draft.jobsite_id, draft.jobsite_name).unwrap();
    writeln!(output, "Customer: {}", draft.customer_name).unwrap();
    writeln!(
        output,
        "  {:<42}  {:>8}  {:>10}  {:>10}",
        "Description", "Qty", "Rate", "Amount"
    )
    .unwrap();
    writeln!(
        output,
        "  ──────────────────────────────────────────  ────────  ──────────  ──────────"
    )
    .unwrap();
    for item in &draft.line_items {
        writeln!(
            output,
            "  {:<42}  {:>8.2}  {:>10}  {:>10}",
            item.description,
            item.quantity,
            Money::from_dollars(item.unit_rate).to_string(),
            item.amount.to_string()
        )
        .unwrap();
    }
    for (label, amount) in [
        ("Subtotal:", draft.subtotal),
        ("Fee:", draft.fee_amount),
        ("Total:", draft.total),
    ] {
        writeln!(output, "{label:>66}  {:>10}", amount.to_string()).unwrap();
    }
}
