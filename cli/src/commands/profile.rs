use anyhow::{Result, bail};
use serde_json::json;

use crate::config::{Config, REMOTE_URL_ENV};
use fitledger_core::ledger::LedgerStore;
use fitledger_core::models::{ProfilePatch, UserProfile};
use fitledger_core::sync::WriteOutcome;

use super::App;

fn print_profile(profile: &UserProfile) {
    fn line<T: std::fmt::Display>(label: &str, value: Option<T>) {
        if let Some(v) = value {
            println!("  {label:<16} {v}");
        }
    }

    line("Name", profile.name.as_deref());
    line("Age", profile.age);
    line("Gender", profile.gender.as_deref());
    line("Height (cm)", profile.height_cm);
    line("Weight (kg)", profile.weight_kg);
    line("Target (kg)", profile.target_weight_kg);
    line("BMI", profile.bmi);
    line("Activity", profile.activity_level.as_deref());
    line("Goal", profile.goal.as_deref());
    line("Calorie goal", profile.daily_calorie_goal);
    line("Protein goal", profile.protein_goal);
    line("Carbs goal", profile.carbs_goal);
    line("Fat goal", profile.fat_goal);
    line("Units", Some(&profile.units));
    line("Notifications", Some(profile.notifications_enabled));
    line("Premium", Some(profile.is_premium));
    line("Onboarded", Some(profile.onboarding_complete));
    if let Some(last) = profile.mood_history.last() {
        line("Last mood", Some(&last.mood));
    }
}

pub(crate) fn cmd_profile_show(
    ledger: &LedgerStore,
    user_id: Option<&str>,
    json: bool,
) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&json!({
                "user_id": user_id,
                "profile": ledger.profile(),
            }))?
        );
        return Ok(());
    }

    match user_id {
        Some(id) => println!("Signed in as {id}"),
        None => println!("Not signed in"),
    }
    match ledger.profile() {
        Some(profile) => print_profile(profile),
        None => eprintln!("No profile yet. Use `fitledger profile set` to create one."),
    }
    Ok(())
}

pub(crate) fn cmd_profile_set(ledger: &mut LedgerStore, patch: &ProfilePatch, json: bool) -> Result<()> {
    if patch.is_empty() {
        bail!("Nothing to update. Pass at least one field, e.g. --weight 72.5");
    }
    let profile = ledger.update_profile(patch)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&profile)?);
    } else {
        println!("Profile updated");
        print_profile(&profile);
    }
    Ok(())
}

pub(crate) fn cmd_mood(ledger: &mut LedgerStore, mood: &str, json: bool) -> Result<()> {
    ledger.record_mood(mood)?;
    let count = ledger.profile().map_or(0, |p| p.mood_history.len());

    if json {
        println!("{}", json!({ "mood": mood.trim(), "entries": count }));
    } else {
        println!("Recorded mood '{}' ({count} total, kept on this device)", mood.trim());
    }
    Ok(())
}

fn outcome_json(outcome: Option<&WriteOutcome>) -> serde_json::Value {
    match outcome {
        None => json!({ "status": "up_to_date" }),
        Some(WriteOutcome::Written { attempts }) => {
            json!({ "status": "written", "attempts": attempts })
        }
        Some(WriteOutcome::Abandoned { attempts, error }) => json!({
            "status": "abandoned",
            "attempts": attempts,
            "error": error.to_string(),
        }),
    }
}

pub(crate) async fn cmd_login(config: &Config, user_id: &str, json: bool) -> Result<()> {
    if let Some(current) = config.user_id()? {
        if current != user_id.trim() {
            bail!("Already signed in as {current}. Run `fitledger logout` first");
        }
    }
    config.set_user_id(user_id)?;

    let app = App::open(config).await?;
    let online = app.sync().is_some();
    app.queue_full_profile();
    let outcome = app.finish().await;

    if json {
        println!(
            "{}",
            json!({
                "user_id": user_id.trim(),
                "online": online,
                "sync": outcome_json(outcome.as_ref()),
            })
        );
    } else {
        println!("Signed in as {}", user_id.trim());
        if !online {
            eprintln!("Offline: set {REMOTE_URL_ENV} to sync your profile.");
        }
    }
    Ok(())
}

pub(crate) async fn cmd_logout(config: &Config, json: bool) -> Result<()> {
    let Some(user_id) = config.user_id()? else {
        bail!("Not signed in");
    };

    let mut app = App::open(config).await?;
    let mut outcome = None;
    if let Some(sync) = app.sync() {
        app.queue_full_profile();
        outcome = sync.flush().await;
        sync.end_session();
    }
    if let Some(WriteOutcome::Abandoned { ref error, .. }) = outcome {
        eprintln!("Warning: last profile changes were not synced ({error})");
    }

    app.ledger.sign_out();
    config.clear_user_id()?;
    app.finish().await;

    if json {
        println!(
            "{}",
            json!({ "signed_out": user_id, "sync": outcome_json(outcome.as_ref()) })
        );
    } else {
        println!("Signed out {user_id}. Ledger entries stay on this device.");
    }
    Ok(())
}

pub(crate) async fn cmd_sync(config: &Config, json: bool) -> Result<()> {
    let app = App::open(config).await?;
    let Some(sync) = app.sync() else {
        bail!("Sync is not configured. Set {REMOTE_URL_ENV} and run `fitledger login <user>`");
    };
    let user_id = sync.user_id().unwrap_or_default();
    app.queue_full_profile();
    let mut fields: Vec<String> = sync.pending_fields().keys().cloned().collect();
    fields.sort();

    let outcome = app.finish().await;

    if json {
        println!(
            "{}",
            json!({
                "user_id": user_id,
                "fields": fields,
                "sync": outcome_json(outcome.as_ref()),
            })
        );
        return Ok(());
    }

    match outcome {
        None => println!("Profile for {user_id} is up to date"),
        Some(WriteOutcome::Written { attempts }) => {
            let tries = if attempts == 1 {
                String::new()
            } else {
                format!(" after {attempts} attempts")
            };
            println!("Synced {} for {user_id}{tries}", fields.join(", "));
        }
        // finish() already printed the warning
        Some(WriteOutcome::Abandoned { .. }) => std::process::exit(1),
    }
    Ok(())
}
