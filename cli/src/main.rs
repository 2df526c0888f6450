mod commands;
mod config;
mod remote;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    App, EntryArgs, cmd_edit, cmd_export, cmd_log, cmd_login, cmd_logout, cmd_mood,
    cmd_profile_set, cmd_profile_show, cmd_quota_show, cmd_quota_use, cmd_remove, cmd_summary,
    cmd_sync, cmd_tag_add, cmd_tag_list, cmd_tag_remove, cmd_year,
};
use crate::config::Config;
use fitledger_core::ledger::LedgerStore;
use fitledger_core::models::ProfilePatch;
use fitledger_core::storage::BlobStore;

#[derive(Parser)]
#[command(
    name = "fitledger",
    version,
    about = "A local-first calorie ledger that keeps your profile in sync"
)]
struct Cli {
    /// Log level when RUST_LOG is unset (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct MacroArgs {
    /// Protein in grams
    #[arg(long)]
    protein: Option<f64>,
    /// Carbs in grams
    #[arg(long)]
    carbs: Option<f64>,
    /// Fat in grams
    #[arg(long)]
    fat: Option<f64>,
    /// Tag, e.g. breakfast or post-workout
    #[arg(short, long)]
    tag: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Log a food entry for today
    Log {
        /// Food name
        name: String,
        /// Calories (kcal)
        calories: f64,
        #[command(flatten)]
        macros: MacroArgs,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Edit an entry
    Edit {
        /// Entry ID (or a unique prefix)
        id: String,
        /// Date of the entry (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// New name
        #[arg(long)]
        name: Option<String>,
        /// New calories
        #[arg(long)]
        calories: Option<f64>,
        #[command(flatten)]
        macros: MacroArgs,
        /// Remove the tag
        #[arg(long)]
        clear_tag: bool,
        /// New time of day (HH:MM)
        #[arg(long)]
        time: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an entry
    Remove {
        /// Entry ID (or a unique prefix)
        id: String,
        /// Date of the entry (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a day's entries and totals (defaults to today)
    Summary {
        /// Date to show (YYYY-MM-DD, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show totals for a calendar year
    Year {
        /// Year (default: current)
        year: Option<i32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Export a year of entries as CSV
    Export {
        /// Year (default: current)
        year: Option<i32>,
        /// Write to a file instead of stdout
        #[arg(short, long, value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// View or edit your profile
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
    /// Record how you feel (kept on this device only)
    Mood {
        mood: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Track AI analysis usage
    Quota {
        #[command(subcommand)]
        command: QuotaCommands,
    },
    /// Manage custom entry tags
    Tag {
        #[command(subcommand)]
        command: TagCommands,
    },
    /// Sign in and push your profile to the remote store
    Login {
        user_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Sign out; ledger entries stay on this device
    Logout {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Push any profile changes the remote is missing
    Sync {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a development document store
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
        /// Disable API key authentication (for development/testing)
        #[arg(long)]
        no_auth: bool,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show the profile
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update profile fields
    Set {
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        age: Option<u32>,
        #[arg(long)]
        gender: Option<String>,
        /// Height in cm
        #[arg(long)]
        height: Option<f64>,
        /// Weight in kg
        #[arg(long)]
        weight: Option<f64>,
        /// Target weight in kg
        #[arg(long)]
        target_weight: Option<f64>,
        /// e.g. sedentary, light, moderate, active
        #[arg(long)]
        activity: Option<String>,
        /// e.g. lose, maintain, gain
        #[arg(long)]
        goal: Option<String>,
        /// Daily calorie goal (kcal)
        #[arg(long)]
        calorie_goal: Option<f64>,
        /// Daily protein goal (g)
        #[arg(long)]
        protein_goal: Option<f64>,
        /// Daily carbs goal (g)
        #[arg(long)]
        carbs_goal: Option<f64>,
        /// Daily fat goal (g)
        #[arg(long)]
        fat_goal: Option<f64>,
        /// metric or imperial
        #[arg(long)]
        units: Option<String>,
        #[arg(long)]
        notifications: Option<bool>,
        #[arg(long)]
        premium: Option<bool>,
        #[arg(long)]
        onboarded: Option<bool>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum QuotaCommands {
    /// Count one analysis against the current window
    Use {
        /// photo or text
        kind: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show usage in the current window
    Show {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum TagCommands {
    /// Add a custom tag
    Add {
        tag: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove a custom tag
    Remove {
        tag: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List custom tags
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;

    match cli.command {
        Commands::Log {
            name,
            calories,
            macros,
            json,
        } => {
            with_ledger(&config, |ledger| {
                cmd_log(ledger, &name, calories, entry_args(None, None, macros), json)
            })
            .await
        }
        Commands::Edit {
            id,
            date,
            name,
            calories,
            macros,
            clear_tag,
            time,
            json,
        } => {
            with_ledger(&config, |ledger| {
                cmd_edit(
                    ledger,
                    date,
                    &id,
                    entry_args(name, calories, macros),
                    clear_tag,
                    time.as_deref(),
                    json,
                )
            })
            .await
        }
        Commands::Remove { id, date, json } => {
            with_ledger(&config, |ledger| cmd_remove(ledger, date, &id, json)).await
        }
        Commands::Summary { date, json } => {
            let found = with_ledger(&config, |ledger| cmd_summary(ledger, date, json)).await?;
            exit_if_empty(found);
            Ok(())
        }
        Commands::Year { year, json } => {
            let found = with_ledger(&config, |ledger| cmd_year(ledger, year, json)).await?;
            exit_if_empty(found);
            Ok(())
        }
        Commands::Export { year, output } => {
            with_ledger(&config, |ledger| cmd_export(ledger, year, output.as_deref())).await
        }
        Commands::Profile { command } => match command {
            ProfileCommands::Show { json } => {
                let user_id = config.user_id()?;
                with_ledger(&config, |ledger| {
                    cmd_profile_show(ledger, user_id.as_deref(), json)
                })
                .await
            }
            ProfileCommands::Set {
                name,
                age,
                gender,
                height,
                weight,
                target_weight,
                activity,
                goal,
                calorie_goal,
                protein_goal,
                carbs_goal,
                fat_goal,
                units,
                notifications,
                premium,
                onboarded,
                json,
            } => {
                let patch = ProfilePatch {
                    name,
                    age,
                    gender,
                    height_cm: height,
                    weight_kg: weight,
                    target_weight_kg: target_weight,
                    activity_level: activity,
                    goal,
                    daily_calorie_goal: calorie_goal,
                    protein_goal,
                    carbs_goal,
                    fat_goal,
                    units,
                    notifications_enabled: notifications,
                    is_premium: premium,
                    onboarding_complete: onboarded,
                };
                with_ledger(&config, |ledger| cmd_profile_set(ledger, &patch, json)).await
            }
        },
        Commands::Mood { mood, json } => {
            with_ledger(&config, |ledger| cmd_mood(ledger, &mood, json)).await
        }
        Commands::Quota { command } => match command {
            QuotaCommands::Use { kind, json } => {
                with_ledger(&config, |ledger| cmd_quota_use(ledger, &kind, json)).await
            }
            QuotaCommands::Show { json } => {
                with_ledger(&config, |ledger| cmd_quota_show(ledger, json)).await
            }
        },
        Commands::Tag { command } => match command {
            TagCommands::Add { tag, json } => {
                with_ledger(&config, |ledger| cmd_tag_add(ledger, &tag, json)).await
            }
            TagCommands::Remove { tag, json } => {
                with_ledger(&config, |ledger| cmd_tag_remove(ledger, &tag, json)).await
            }
            TagCommands::List { json } => {
                with_ledger(&config, |ledger| cmd_tag_list(ledger, json)).await
            }
        },
        Commands::Login { user_id, json } => cmd_login(&config, &user_id, json).await,
        Commands::Logout { json } => cmd_logout(&config, json).await,
        Commands::Sync { json } => cmd_sync(&config, json).await,
        Commands::Serve {
            port,
            bind,
            no_auth,
        } => {
            let api_key = if no_auth {
                None
            } else {
                Some(config.load_or_create_api_key()?.0)
            };
            let store = BlobStore::open(&config.server_store_path)?;
            server::start_server(store, port, &bind, api_key).await
        }
    }
}

/// Open the ledger, run `f` against it, then flush pending sync work.
async fn with_ledger<T>(
    config: &Config,
    f: impl FnOnce(&mut LedgerStore) -> Result<T>,
) -> Result<T> {
    let mut app = App::open(config).await?;
    let result = f(&mut app.ledger);
    app.finish().await;
    result
}

/// Exit code 2 means the query matched nothing.
fn exit_if_empty(found: bool) {
    if !found {
        process::exit(2);
    }
}

fn entry_args(name: Option<String>, calories: Option<f64>, macros: MacroArgs) -> EntryArgs {
    EntryArgs {
        name,
        calories,
        protein: macros.protein,
        carbs: macros.carbs,
        fat: macros.fat,
        tag: macros.tag,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_log_with_macros() {
        let cli = Cli::try_parse_from([
            "fitledger", "log", "Oats", "300", "--protein", "10", "--tag", "breakfast",
        ])
        .unwrap();
        let Commands::Log {
            name,
            calories,
            macros,
            json,
        } = cli.command
        else {
            panic!("expected log");
        };
        assert_eq!(name, "Oats");
        assert_eq!(calories, 300.0);
        assert_eq!(macros.protein, Some(10.0));
        assert_eq!(macros.tag.as_deref(), Some("breakfast"));
        assert!(!json);
    }

    #[test]
    fn test_parse_profile_set() {
        let cli = Cli::try_parse_from([
            "fitledger", "profile", "set", "--weight", "72.5", "--premium", "true",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Profile {
                command: ProfileCommands::Set {
                    weight: Some(_),
                    premium: Some(true),
                    ..
                }
            }
        ));
    }
}
