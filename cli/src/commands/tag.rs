use anyhow::{Result, bail};

use fitledger_core::ledger::LedgerStore;

pub(crate) fn cmd_tag_add(ledger: &mut LedgerStore, tag: &str, json: bool) -> Result<()> {
    let added = ledger.add_custom_tag(tag)?;
    let tag = tag.trim();

    if json {
        println!("{}", serde_json::json!({ "tag": tag, "added": added }));
    } else if added {
        println!("Added tag '{tag}'");
    } else {
        println!("Tag '{tag}' already exists");
    }
    Ok(())
}

pub(crate) fn cmd_tag_remove(ledger: &mut LedgerStore, tag: &str, json: bool) -> Result<()> {
    if !ledger.remove_custom_tag(tag) {
        bail!("No tag '{}'", tag.trim());
    }

    if json {
        println!("{}", serde_json::json!({ "deleted": tag.trim() }));
    } else {
        println!("Removed tag '{}'", tag.trim());
    }
    Ok(())
}

pub(crate) fn cmd_tag_list(ledger: &LedgerStore, json: bool) -> Result<()> {
    let tags = ledger.custom_tags();

    if json {
        println!("{}", serde_json::to_string_pretty(tags)?);
    } else if tags.is_empty() {
        eprintln!("No custom tags. Use `fitledger tag add <tag>` to create one.");
    } else {
        for tag in tags {
            println!("{tag}");
        }
    }
    Ok(())
}
