use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use grant_core::StartupStage;
use grant_match::commands::{
    priority_keywords, register_profile, show_profile, test_match, top_matches, ProfileRegistration,
};
use grant_storage::{SheetCatalog, SheetProfileStore, Workbook};
use grant_sync::{load_field_rules, run_once_from_config, SyncConfig};
use tracing::debug;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Parser)]
#[command(name = "grant-cli")]
#[command(about = "Startup grant ingestion and matching")]
struct Cli {
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Scrape every enabled source once and append new listings to the catalog.
    Sync,
    /// Create or replace a subject's interest profile.
    RegisterProfile {
        subject_id: String,
        /// Comma separated, e.g. "AI,핀테크,플랫폼".
        #[arg(long)]
        keywords: String,
        #[arg(long, default_value = "")]
        description: String,
        /// pre-founding, early, seed, or series-a.
        #[arg(long, default_value = "early")]
        stage: StartupStage,
        #[arg(long)]
        region: Option<String>,
        #[arg(long)]
        support_types: Option<String>,
    },
    ShowProfile {
        subject_id: String,
    },
    /// Score one catalog listing (the first one by default) against a profile.
    TestMatch {
        subject_id: String,
        #[arg(long)]
        record_id: Option<String>,
    },
    /// Best catalog listings for a profile.
    Matches {
        subject_id: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
    },
    /// Interest keywords aggregated across all profiles.
    Priorities,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_writer(std::io::stderr))
        .init();
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value).context("serializing output")?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let cli = Cli::parse();
    let config = SyncConfig::from_env();
    debug!(?config, "loaded configuration");

    let workbook = Workbook::open(config.store_config());
    let catalog = SheetCatalog::new(workbook.grants());
    let profiles = SheetProfileStore::new(workbook.profiles());

    match cli.command.unwrap_or(Commands::Sync) {
        Commands::Sync => {
            let summary = run_once_from_config(&config).await;
            if cli.json {
                print_json(&summary)?;
            } else {
                println!(
                    "sync complete: run_id={} candidates={} persisted={} duplicates={} failed={} fallback={}",
                    summary.run_id,
                    summary.candidates,
                    summary.persisted,
                    summary.skipped_duplicates,
                    summary.failed_appends,
                    summary.used_fallback
                );
                for (source, count) in &summary.per_source {
                    println!("  {source}: {count}");
                }
            }
        }
        Commands::RegisterProfile {
            subject_id,
            keywords,
            description,
            stage,
            region,
            support_types,
        } => {
            let registration = ProfileRegistration {
                keywords,
                description,
                stage,
                region,
                support_types,
            };
            let profile = register_profile(&profiles, &subject_id, registration).await?;
            if cli.json {
                print_json(&profile)?;
            } else {
                println!(
                    "registered {}: {} ({})",
                    profile.subject_id,
                    profile.keywords.join(", "),
                    profile.stage
                );
            }
        }
        Commands::ShowProfile { subject_id } => {
            match show_profile(&profiles, &subject_id).await? {
                Some(profile) if cli.json => print_json(&profile)?,
                Some(profile) => {
                    println!("subject:  {}", profile.subject_id);
                    println!("keywords: {}", profile.keywords.join(", "));
                    println!("stage:    {}", profile.stage);
                    if let Some(region) = &profile.region {
                        println!("region:   {region}");
                    }
                    if !profile.support_types.is_empty() {
                        println!("support:  {}", profile.support_types.join(", "));
                    }
                    if !profile.description.is_empty() {
                        println!("about:    {}", profile.description);
                    }
                }
                None => println!("no profile registered for {subject_id}"),
            }
        }
        Commands::TestMatch {
            subject_id,
            record_id,
        } => {
            let result = test_match(&catalog, &profiles, &subject_id, record_id.as_deref()).await?;
            if cli.json {
                print_json(&result)?;
            } else {
                println!("{} score={:.2} {}", result.record_id, result.score, result.justification);
            }
        }
        Commands::Matches { subject_id, limit } => {
            let ranked = top_matches(&catalog, &profiles, &subject_id, limit).await?;
            if cli.json {
                print_json(&ranked)?;
            } else if ranked.is_empty() {
                println!("no matching listings for {subject_id}");
            } else {
                for m in &ranked {
                    println!("{} score={:.2} {}", m.record_id, m.score, m.justification);
                }
            }
        }
        Commands::Priorities => {
            let rules = load_field_rules(&config.workspace_root, config.max_keywords).await?;
            let keywords = priority_keywords(&profiles, &rules.taxonomy).await?;
            if cli.json {
                print_json(&keywords)?;
            } else {
                println!("{}", keywords.join(", "));
            }
        }
    }

    Ok(())
}
