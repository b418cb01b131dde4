//! wp-todo - Offline-first to-do client for WordPress sites
//!
//! Headless driver for the sync engine: every subcommand loads the stored
//! state, performs one engine operation and exits.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use wp_todo::config::AppConfig;
use wp_todo::discovery::HostedSite;
use wp_todo::models::{CalendarTarget, Credentials, TaskId};
use wp_todo::{NoReminders, Store, SyncEngine};

#[derive(Parser)]
#[command(name = "wp-todo")]
#[command(about = "Offline-first to-dos stored in a WordPress site")]
#[command(version)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new config file
    Init {
        /// Output path for config file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Connect to a WordPress site
    Connect {
        /// Site address, with or without scheme
        url: String,

        /// Account name for application-password login
        #[arg(short, long, default_value = "")]
        username: String,

        /// Application password
        #[arg(short, long, default_value = "")]
        password: String,

        /// OAuth bearer token (takes precedence over username/password)
        #[arg(short, long, default_value = "")]
        token: String,

        /// WordPress.com site id; connects through the hosted API with --token
        #[arg(long, requires = "token")]
        wpcom_site: Option<u64>,
    },

    /// Choose the content type holding to-dos (when the plugin is absent)
    Select {
        post_type: String,

        #[arg(short, long)]
        taxonomy: Option<String>,
    },

    /// Push local changes, pull the site and reconcile reminders
    Sync,

    /// List tasks
    List {
        /// Only tasks in this term (id or slug)
        #[arg(short, long)]
        term: Option<String>,
    },

    /// Add a task
    Add {
        subject: String,

        /// Term id or slug
        #[arg(short, long)]
        term: Option<String>,

        #[arg(short, long)]
        note: Option<String>,
    },

    /// Mark a task done, or not done
    Toggle { id: String },

    /// Change a task's subject
    Rename { id: String, subject: String },

    /// Set or clear a task's note
    Note { id: String, text: Option<String> },

    /// Delete a task
    Delete { id: String },

    /// Term shown by default (id or slug); omit to show everything
    DefaultView { term: Option<String> },

    /// Sync a term with a reminders calendar, or "no" to stop syncing it
    MapCalendar { term: String, calendar: String },

    /// Forget the site and all cached data
    Logout,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("wp_todo=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => AppConfig::default_path()?,
    };

    if let Commands::Init { output } = &cli.command {
        let path = output.clone().unwrap_or(config_path);
        AppConfig::default().save_to(&path)?;

        println!("Created config file: {}", path.display());
        println!();
        println!("Next steps:");
        println!("  1. Connect: wp-todo connect example.org --username me --password <app password>");
        println!("  2. Sync:    wp-todo sync");
        return Ok(());
    }

    let cfg = if config_path.exists() {
        AppConfig::load_from(&config_path)?
    } else {
        AppConfig::default()
    };

    let store = Store::open(&cfg.storage.path)
        .with_context(|| format!("Failed to open database {}", cfg.storage.path.display()))?;
    let mut engine = SyncEngine::new(store, Box::new(NoReminders), &cfg.client_options())?;
    let ready = engine.load()?;

    match cli.command {
        // Written before the store is opened.
        Commands::Init { .. } => {}

        Commands::Connect {
            url,
            username,
            password,
            token,
            wpcom_site,
        } => {
            let plugin_detected = match wpcom_site {
                Some(id) => {
                    let site = HostedSite {
                        id,
                        url: url.clone(),
                        name: url.clone(),
                        icon_url: None,
                    };
                    engine.connect_hosted(&site, &token).await?
                }
                None => {
                    let credentials = Credentials::from_parts(&username, &password, &token);
                    engine.connect(&url, credentials).await?
                }
            };

            let site = engine.site();
            println!("Connected to {} as {}", site.site_title, site.username);
            if plugin_detected {
                println!("To-do plugin found. Run 'wp-todo sync' to fetch your tasks.");
            } else {
                println!("No to-do plugin found. Pick a content type:");
                for post_type in &site.post_types {
                    println!("  {} ({})", post_type.slug, post_type.name);
                }
                println!("Then run: wp-todo select <post_type> [--taxonomy <slug>]");
            }
        }

        Commands::Select {
            post_type,
            taxonomy,
        } => {
            engine.select_content_type(&post_type, taxonomy.as_deref())?;
            println!("Using content type '{}'.", post_type);
        }

        Commands::Sync => {
            if !ready {
                bail!("Not connected. Run 'wp-todo connect <site>' first.");
            }
            let report = engine.sync().await?;
            println!(
                "Pushed: {} created, {} updated, {} deleted. Pulled {} task(s).",
                report.created, report.updated, report.deleted, report.pulled
            );
            if let Some(message) = report.error_summary() {
                eprintln!("{}", message);
            }
        }

        Commands::List { term } => {
            let filter = match term.or_else(|| engine.site().default_term.clone()) {
                Some(term) => Some(resolve_term(&engine, &term)?),
                None => None,
            };
            let tasks = engine.tasks_in_term(filter);
            if tasks.is_empty() {
                println!("No tasks.");
            }
            for task in tasks {
                let mark = if task.done { "x" } else { " " };
                let pending = if task.dirty { " *" } else { "" };
                println!("[{}] {:>14}  {}{}", mark, task.id.to_string(), task.subject, pending);
                if let Some(note) = &task.note {
                    println!("                    {}", note);
                }
            }
        }

        Commands::Add {
            subject,
            term,
            note,
        } => {
            let filter = match term {
                Some(term) => Some(resolve_term(&engine, &term)?),
                None => None,
            };
            let id = engine.create_empty_task(filter)?;
            engine.change_subject(&id, subject)?;
            if note.is_some() {
                engine.change_note(&id, note)?;
            }
            println!("Added {}", id);
        }

        Commands::Toggle { id } => {
            let id = parse_id(&id)?;
            engine.toggle_task(&id)?;
        }

        Commands::Rename { id, subject } => {
            let id = parse_id(&id)?;
            engine.change_subject(&id, subject)?;
        }

        Commands::Note { id, text } => {
            let id = parse_id(&id)?;
            engine.change_note(&id, text)?;
        }

        Commands::Delete { id } => {
            let id = parse_id(&id)?;
            engine.delete_task(&id)?;
        }

        Commands::DefaultView { term } => {
            let view = match term {
                Some(term) => Some(resolve_term(&engine, &term)?.to_string()),
                None => None,
            };
            engine.set_default_view(view)?;
        }

        Commands::MapCalendar { term, calendar } => {
            let term_id = resolve_term(&engine, &term)?;
            engine.map_reminders_calendar(term_id, CalendarTarget::from(calendar))?;
        }

        Commands::Logout => {
            engine.logout()?;
            println!("Logged out.");
        }
    }

    Ok(())
}

fn parse_id(id: &str) -> Result<TaskId> {
    id.parse().map_err(anyhow::Error::msg)
}

/// Term by numeric id or slug
fn resolve_term(engine: &SyncEngine, term: &str) -> Result<u64> {
    if let Ok(id) = term.parse::<u64>() {
        return Ok(id);
    }
    engine
        .terms()
        .iter()
        .find(|t| t.slug == term)
        .map(|t| t.id)
        .with_context(|| format!("Unknown term '{}'", term))
}
