use anyhow::{Context, Result, bail};

use fitledger_core::ledger::LedgerStore;
use fitledger_core::models::{CalorieEntry, EntryUpdate, NewCalorieEntry};

use super::helpers::{date_key, entry_time, parse_date, resolve_entry_id, short_id, timestamp_on};

pub(crate) struct EntryArgs {
    pub name: Option<String>,
    pub calories: Option<f64>,
    pub protein: Option<f64>,
    pub carbs: Option<f64>,
    pub fat: Option<f64>,
    pub tag: Option<String>,
}

fn print_entry(verb: &str, entry: &CalorieEntry) {
    let tag = entry
        .tag
        .as_ref()
        .map(|t| format!(" [{t}]"))
        .unwrap_or_default();
    println!(
        "{verb} {} {}{tag}: {:.0} kcal | P:{:.0}g C:{:.0}g F:{:.0}g (id {})",
        entry_time(entry),
        entry.name,
        entry.calories,
        entry.protein,
        entry.carbs,
        entry.fat,
        short_id(&entry.id),
    );
}

/// Tags must be one of the user's custom tags when any exist.
fn check_tag(ledger: &LedgerStore, tag: Option<&str>) -> Result<()> {
    let Some(tag) = tag else {
        return Ok(());
    };
    let tags = ledger.custom_tags();
    if !tags.is_empty() && !tags.iter().any(|t| t == tag) {
        bail!(
            "Unknown tag '{tag}'. Known tags: {}. Add it with `fitledger tag add {tag}`",
            tags.join(", ")
        );
    }
    Ok(())
}

pub(crate) fn cmd_log(
    ledger: &mut LedgerStore,
    name: &str,
    calories: f64,
    args: EntryArgs,
    json: bool,
) -> Result<()> {
    check_tag(ledger, args.tag.as_deref())?;
    let entry = ledger.add_entry(&NewCalorieEntry {
        name: name.to_string(),
        tag: args.tag,
        calories,
        protein: args.protein.unwrap_or(0.0),
        carbs: args.carbs.unwrap_or(0.0),
        fat: args.fat.unwrap_or(0.0),
    })?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        print_entry("Logged", &entry);
        if let Some(today) = ledger.today() {
            println!("  Today: {:.0} kcal", today.total_calories);
        }
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub(crate) fn cmd_edit(
    ledger: &mut LedgerStore,
    date: Option<String>,
    id: &str,
    args: EntryArgs,
    clear_tag: bool,
    time: Option<&str>,
    json: bool,
) -> Result<()> {
    let date = parse_date(date)?;
    let key = date_key(date);
    let bucket = ledger
        .daily(&key)
        .with_context(|| format!("No entries on {key}"))?;
    let id = resolve_entry_id(bucket, id)?;

    if clear_tag && args.tag.is_some() {
        bail!("--tag and --clear-tag cannot be used together");
    }
    check_tag(ledger, args.tag.as_deref())?;

    let update = EntryUpdate {
        name: args.name,
        tag: if clear_tag { Some(None) } else { args.tag.map(Some) },
        calories: args.calories,
        protein: args.protein,
        carbs: args.carbs,
        fat: args.fat,
        timestamp: time.map(|t| timestamp_on(date, t)).transpose()?,
    };

    let updated = ledger
        .edit_entry(&key, &id, &update)?
        .with_context(|| format!("No entry '{id}' on {key}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&updated)?);
    } else {
        print_entry("Updated", &updated);
    }
    Ok(())
}

pub(crate) fn cmd_remove(
    ledger: &mut LedgerStore,
    date: Option<String>,
    id: &str,
    json: bool,
) -> Result<()> {
    let key = date_key(parse_date(date)?);
    let bucket = ledger
        .daily(&key)
        .with_context(|| format!("No entries on {key}"))?;
    let id = resolve_entry_id(bucket, id)?;

    let removed = ledger
        .remove_entry(&key, &id)
        .with_context(|| format!("No entry '{id}' on {key}"))?;

    if json {
        println!("{}", serde_json::json!({ "deleted": removed.id }));
    } else {
        println!(
            "Removed {} ({:.0} kcal) from {key}",
            removed.name, removed.calories
        );
    }
    Ok(())
}
