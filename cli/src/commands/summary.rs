use anyhow::{Context, Result};
use std::path::Path;

use fitledger_core::ledger::LedgerStore;

use super::helpers::{date_key, no_neg_zero, parse_date, parse_year, print_entry_table};

/// Returns `false` when the day has no entries.
pub(crate) fn cmd_summary(ledger: &LedgerStore, date: Option<String>, json: bool) -> Result<bool> {
    let key = date_key(parse_date(date)?);
    let Some(day) = ledger.daily(&key).filter(|d| !d.entries.is_empty()) else {
        if json {
            println!("{}", serde_json::json!({ "date": key, "entries": [] }));
        } else {
            eprintln!("No entries for {key}");
        }
        return Ok(false);
    };

    if json {
        println!("{}", serde_json::to_string_pretty(day)?);
        return Ok(true);
    }

    println!("=== {key} ===\n");
    print_entry_table(&day.entries);

    let total_cal = no_neg_zero(day.total_calories);
    let total_p = no_neg_zero(day.total_protein);
    let total_c = no_neg_zero(day.total_carbs);
    let total_f = no_neg_zero(day.total_fat);
    println!("\n  TOTAL: {total_cal:.0} kcal | P:{total_p:.0}g C:{total_c:.0}g F:{total_f:.0}g");

    if let Some(goal) = ledger.profile().and_then(|p| p.daily_calorie_goal) {
        let remaining = goal - total_cal;
        println!("  GOAL: {goal:.0} kcal");
        println!("  REMAINING: {remaining:.0} kcal");
    }

    Ok(true)
}

/// Returns `false` when the year has no entries.
pub(crate) fn cmd_year(ledger: &LedgerStore, year: Option<i32>, json: bool) -> Result<bool> {
    let year = parse_year(year)?;
    let summary = ledger.year_summary(year);

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(summary.entry_count > 0);
    }

    if summary.entry_count == 0 {
        eprintln!("No entries in {year}");
        return Ok(false);
    }

    println!("=== {year} ===\n");
    println!(
        "  {} entries over {} days",
        summary.entry_count, summary.days_logged
    );
    println!(
        "  TOTAL: {:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g",
        summary.total_calories, summary.total_protein, summary.total_carbs, summary.total_fat
    );
    println!(
        "  AVERAGE: {:.0} kcal per logged day",
        summary.average_daily_calories
    );
    Ok(true)
}

pub(crate) fn cmd_export(ledger: &LedgerStore, year: Option<i32>, output: Option<&Path>) -> Result<()> {
    let year = parse_year(year)?;
    let rows = match output {
        Some(path) => {
            let file = std::fs::File::create(path)
                .with_context(|| format!("Failed to create {}", path.display()))?;
            let rows = ledger.export_year_csv(year, file)?;
            eprintln!("Exported {rows} entries to {}", path.display());
            rows
        }
        None => ledger.export_year_csv(year, std::io::stdout().lock())?,
    };
    if rows == 0 {
        eprintln!("No entries in {year}");
    }
    Ok(())
}
