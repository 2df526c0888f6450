use anyhow::Result;
use serde::Serialize;
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use fitledger_core::ledger::LedgerStore;
use fitledger_core::models::QuotaKind;

fn label(kind: QuotaKind) -> &'static str {
    match kind {
        QuotaKind::PhotoAnalysis => "photo",
        QuotaKind::TextAnalysis => "text",
    }
}

pub(crate) fn cmd_quota_use(ledger: &mut LedgerStore, kind: &str, json: bool) -> Result<()> {
    let kind = QuotaKind::parse(kind)?;
    let used = ledger.increment_quota(kind);
    let remaining = ledger.quota_remaining(kind);

    if json {
        println!(
            "{}",
            serde_json::json!({ "quota": label(kind), "used": used, "remaining": remaining })
        );
    } else {
        println!(
            "Used {} analysis ({used} this window, {remaining} left)",
            label(kind)
        );
        if remaining == 0 {
            eprintln!("Note: {} analysis quota is used up until the next reset", label(kind));
        }
    }
    Ok(())
}

pub(crate) fn cmd_quota_show(ledger: &LedgerStore, json: bool) -> Result<()> {
    #[derive(Tabled, Serialize)]
    struct QuotaRow {
        #[tabled(rename = "Quota")]
        quota: &'static str,
        #[tabled(rename = "Used")]
        used: u32,
        #[tabled(rename = "Limit")]
        limit: u32,
        #[tabled(rename = "Remaining")]
        remaining: u32,
    }

    let rows: Vec<QuotaRow> = [QuotaKind::PhotoAnalysis, QuotaKind::TextAnalysis]
        .into_iter()
        .map(|kind| QuotaRow {
            quota: label(kind),
            used: ledger.quota_used(kind),
            limit: ledger.quota_limit(kind),
            remaining: ledger.quota_remaining(kind),
        })
        .collect();

    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(1..)).with(Alignment::right()))
        .to_string();
    println!("{table}");
    Ok(())
}
