use anyhow::{Context, Result, bail};
use chrono::{Datelike, Local, NaiveDate, NaiveTime, TimeZone};
use tabled::{
    Table, Tabled,
    settings::{Alignment, Modify, Style, object::Columns},
};

use fitledger_core::clock::local_datetime;
use fitledger_core::models::{CalorieEntry, DailyLedger};

pub(crate) fn parse_date(date_str: Option<String>) -> Result<NaiveDate> {
    match date_str {
        None => Ok(Local::now().date_naive()),
        Some(s) => match s.as_str() {
            "today" => Ok(Local::now().date_naive()),
            "yesterday" => Ok(Local::now().date_naive() - chrono::Duration::days(1)),
            _ => NaiveDate::parse_from_str(&s, "%Y-%m-%d").with_context(|| {
                format!("Invalid date '{s}'. Use YYYY-MM-DD or today/yesterday")
            }),
        },
    }
}

pub(crate) fn date_key(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

pub(crate) fn parse_year(year: Option<i32>) -> Result<i32> {
    let year = year.unwrap_or_else(|| Local::now().year());
    if !(1970..=9999).contains(&year) {
        bail!("Invalid year {year}");
    }
    Ok(year)
}

/// Epoch milliseconds for `time` (HH:MM) on `date`, in local time.
pub(crate) fn timestamp_on(date: NaiveDate, time: &str) -> Result<i64> {
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M")
        .with_context(|| format!("Invalid time '{time}'. Use HH:MM"))?;
    let local = Local
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .with_context(|| format!("{date} {time} does not exist in local time"))?;
    Ok(local.timestamp_millis())
}

/// Resolve a full entry id from a unique prefix within `bucket`.
pub(crate) fn resolve_entry_id(bucket: &DailyLedger, prefix: &str) -> Result<String> {
    let prefix = prefix.trim();
    if prefix.is_empty() {
        bail!("Entry id must not be empty");
    }
    let mut matches = bucket.entries.iter().filter(|e| e.id.starts_with(prefix));
    let Some(first) = matches.next() else {
        bail!("No entry '{prefix}' on {}", bucket.date);
    };
    if matches.next().is_some() {
        bail!("Entry id '{prefix}' is ambiguous on {}; use more characters", bucket.date);
    }
    Ok(first.id.clone())
}

pub(crate) fn short_id(id: &str) -> &str {
    id.get(..8).unwrap_or(id)
}

pub(crate) fn entry_time(entry: &CalorieEntry) -> String {
    local_datetime(entry.timestamp).map_or_else(|| "?".to_string(), |dt| dt.format("%H:%M").to_string())
}

pub(crate) fn print_entry_table(entries: &[CalorieEntry]) {
    #[derive(Tabled)]
    struct EntryRow {
        #[tabled(rename = "ID")]
        id: String,
        #[tabled(rename = "Time")]
        time: String,
        #[tabled(rename = "Name")]
        name: String,
        #[tabled(rename = "Tag")]
        tag: String,
        #[tabled(rename = "kcal")]
        calories: String,
        #[tabled(rename = "P")]
        protein: String,
        #[tabled(rename = "C")]
        carbs: String,
        #[tabled(rename = "F")]
        fat: String,
    }

    let rows: Vec<EntryRow> = entries
        .iter()
        .map(|e| EntryRow {
            id: short_id(&e.id).to_string(),
            time: entry_time(e),
            name: truncate(&e.name, 30),
            tag: e.tag.as_deref().map(|t| truncate(t, 15)).unwrap_or_default(),
            calories: format!("{:.0}", no_neg_zero(e.calories)),
            protein: format!("{:.0}g", no_neg_zero(e.protein)),
            carbs: format!("{:.0}g", no_neg_zero(e.carbs)),
            fat: format!("{:.0}g", no_neg_zero(e.fat)),
        })
        .collect();

    let table = Table::new(&rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::new(4..8)).with(Alignment::right()))
        .to_string();
    println!("{table}");
}

pub(crate) fn no_neg_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let end = s.char_indices().nth(max - 3).map_or(s.len(), |(i, _)| i);
        format!("{}...", &s[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bucket(ids: &[&str]) -> DailyLedger {
        let mut b = DailyLedger::new("2024-06-15");
        for id in ids {
            b.entries.push(CalorieEntry {
                id: (*id).to_string(),
                timestamp: 0,
                name: "x".to_string(),
                tag: None,
                calories: 0.0,
                protein: 0.0,
                carbs: 0.0,
                fat: 0.0,
            });
        }
        b
    }

    #[test]
    fn test_parse_date_none() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(None).unwrap(), today);
    }

    #[test]
    fn test_parse_date_keywords() {
        let today = Local::now().date_naive();
        assert_eq!(parse_date(Some("today".to_string())).unwrap(), today);
        assert_eq!(
            parse_date(Some("yesterday".to_string())).unwrap(),
            today - chrono::Duration::days(1)
        );
    }

    #[test]
    fn test_parse_date_iso() {
        let date = parse_date(Some("2024-01-15".to_string())).unwrap();
        assert_eq!(date, NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        assert_eq!(date_key(date), "2024-01-15");
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date(Some("nope".to_string())).is_err());
    }

    #[test]
    fn test_parse_year() {
        assert_eq!(parse_year(Some(2024)).unwrap(), 2024);
        assert_eq!(parse_year(None).unwrap(), Local::now().year());
        assert!(parse_year(Some(12)).is_err());
    }

    #[test]
    fn test_timestamp_on() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 15).unwrap();
        let ts = timestamp_on(date, "12:30").unwrap();
        let dt = local_datetime(ts).unwrap();
        assert_eq!(dt.format("%Y-%m-%d %H:%M").to_string(), "2024-06-15 12:30");
        assert!(timestamp_on(date, "25:00").is_err());
    }

    #[test]
    fn test_resolve_entry_id_by_prefix() {
        let b = bucket(&["abc12345-1", "abd99999-2"]);
        assert_eq!(resolve_entry_id(&b, "abc").unwrap(), "abc12345-1");
        assert_eq!(resolve_entry_id(&b, "abd99999-2").unwrap(), "abd99999-2");
        assert!(resolve_entry_id(&b, "ab").is_err());
        assert!(resolve_entry_id(&b, "zzz").is_err());
        assert!(resolve_entry_id(&b, " ").is_err());
    }

    #[test]
    fn test_short_id() {
        assert_eq!(short_id("0123456789abcdef"), "01234567");
        assert_eq!(short_id("abc"), "abc");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world this is long", 10), "hello w...");
        assert_eq!(truncate("Crème fraîche", 10), "Crème f...");
    }

    #[test]
    fn test_no_neg_zero() {
        assert_eq!(no_neg_zero(-0.0).to_bits(), 0.0_f64.to_bits());
        assert_eq!(no_neg_zero(5.0), 5.0);
    }
}
