// CLI module - command-line argument parsing and handlers
//
// Operator surface over the engine:
// - config --show/--path/--reset: inspect or regenerate configuration
// - migrate: backfill the identity index from existing accounts
// - resolve / stats / watch: read paths
// - create-account / record-view / record-click: write paths, for seeding and smoke tests

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use linkstats::accounts::NewAccount;
use linkstats::analytics::{AnalyticsSummary, LinkInfo, RecordOutcome, ViewerInfo};
use linkstats::attribution::PageVisit;
use linkstats::clock::Clock;
use linkstats::config::{Config, VERSION};
use linkstats::Engine;
use std::time::Duration;

/// linkstats - identity resolution and profile analytics
#[derive(Parser)]
#[command(name = "linkstats")]
#[command(version = VERSION)]
#[command(about = "Identity resolution and real-time profile analytics", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage configuration
    Config {
        /// Show effective configuration
        #[arg(long)]
        show: bool,

        /// Reset config file to defaults
        #[arg(long)]
        reset: bool,

        /// Show config file path
        #[arg(long)]
        path: bool,
    },

    /// Backfill the identity index from all accounts
    Migrate,

    /// Resolve a username, display name, email, or account id
    Resolve { identifier: String },

    /// Print analytics summaries
    Stats {
        #[arg(required = true)]
        account_ids: Vec<String>,

        /// Output JSON
        #[arg(long)]
        json: bool,
    },

    /// Follow one account's analytics until Ctrl-C
    Watch {
        account_id: String,

        /// Re-read interval in seconds (picks up writes from other processes)
        #[arg(long, default_value_t = 2)]
        interval: u64,
    },

    /// Create an account and index its identifiers
    CreateAccount {
        account_id: String,
        username: String,

        #[arg(long)]
        display_name: Option<String>,

        #[arg(long)]
        email: Option<String>,

        #[arg(long)]
        group_id: Option<String>,
    },

    /// Record a profile view
    RecordView {
        identifier: String,

        /// Referrer URL of the visit
        #[arg(long)]
        referrer: Option<String>,

        /// Landing page (absolute URL or path, may carry utm_* parameters)
        #[arg(long, default_value = "/")]
        landing: String,

        /// Host serving a relative landing page; same-host referrers count as direct
        #[arg(long)]
        site: Option<String>,

        #[arg(long)]
        user_agent: Option<String>,

        #[arg(long)]
        ip: Option<String>,

        #[arg(long)]
        country: Option<String>,
    },

    /// Record a link click
    RecordClick {
        identifier: String,

        #[arg(long)]
        link_id: String,

        #[arg(long, default_value = "")]
        title: String,

        #[arg(long, default_value = "")]
        url: String,

        #[arg(long = "type", default_value = "custom")]
        link_type: String,
    },
}

// ─────────────────────────────────────────────────────────────────────────────
// Config subcommand (runs before logging and store setup)
// ─────────────────────────────────────────────────────────────────────────────

pub fn handle_config(show: bool, reset: bool, path: bool) -> anyhow::Result<()> {
    if path {
        let path = Config::config_path().context("could not determine config path")?;
        println!("{}", path.display());
    } else if show {
        let config = Config::from_env()?;
        println!("# Effective configuration (env > file > defaults)");
        println!();
        print!("{}", config.to_toml());
    } else if reset {
        let path = Config::config_path().context("could not determine config path")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("cannot create {}", parent.display()))?;
        }
        std::fs::write(&path, Config::default().to_toml())
            .with_context(|| format!("cannot write {}", path.display()))?;
        println!("Config reset to defaults: {}", path.display());
    } else {
        println!("Usage: linkstats config [--show|--reset|--path]");
        println!();
        println!("Options:");
        println!("  --show    Display effective configuration");
        println!("  --reset   Reset config file to defaults");
        println!("  --path    Show config file path");
    }
    Ok(())
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine subcommands
// ─────────────────────────────────────────────────────────────────────────────

pub async fn run(command: Commands, engine: &Engine) -> anyhow::Result<()> {
    match command {
        Commands::Config { show, reset, path } => handle_config(show, reset, path)?,
        Commands::Migrate => {
            let report = tokio::task::block_in_place(|| engine.backfill())?;
            println!("Backfill complete: {report}");
        }
        Commands::Resolve { identifier } => {
            let entry = engine.index.resolve(&identifier)?;
            println!("{}", serde_json::to_string_pretty(&entry)?);
        }
        Commands::Stats { account_ids, json } => {
            let summaries = engine.reader.get_bulk_analytics(&account_ids);
            if json {
                println!("{}", serde_json::to_string_pretty(&summaries)?);
            } else {
                for (account_id, summary) in &summaries {
                    match summary {
                        Some(summary) => print_summary(account_id, summary),
                        None => println!("{account_id}: unavailable (see log)\n"),
                    }
                }
            }
        }
        Commands::Watch {
            account_id,
            interval,
        } => watch(engine, &account_id, Duration::from_secs(interval.max(1))).await?,
        Commands::CreateAccount {
            account_id,
            username,
            display_name,
            email,
            group_id,
        } => {
            let account = engine.accounts.create_account(NewAccount {
                account_id,
                username,
                display_name,
                email,
                group_id,
            })?;
            println!("Created account {} ({})", account.account_id, account.username);
        }
        Commands::RecordView {
            identifier,
            referrer,
            landing,
            site,
            user_agent,
            ip,
            country,
        } => {
            let visit = PageVisit {
                referrer: referrer.as_deref(),
                landing_page: &landing,
                site_host: site.as_deref(),
            };
            let session = engine.classifier.attribute(None, &visit, engine.clock.now());
            println!(
                "Attributed to {} / {}",
                session.traffic_source.source, session.traffic_source.medium
            );
            let viewer = ViewerInfo {
                user_agent,
                referrer,
                ip_address: ip,
                country,
                session: Some(session),
            };
            report(engine.recorder.record_profile_view(&identifier, Some(&viewer)))?;
        }
        Commands::RecordClick {
            identifier,
            link_id,
            title,
            url,
            link_type,
        } => {
            let link = LinkInfo {
                link_id,
                title,
                url,
                link_type,
            };
            report(engine.recorder.record_link_click(&identifier, &link, None))?;
        }
    }
    Ok(())
}

fn report(outcome: RecordOutcome) -> anyhow::Result<()> {
    match outcome {
        RecordOutcome::Recorded {
            account_id,
            created,
        } => {
            let note = if created { " (new aggregate)" } else { "" };
            println!("Recorded for {account_id}{note}");
            Ok(())
        }
        RecordOutcome::Dropped(reason) => bail!("event dropped: {reason:?}"),
    }
}

async fn watch(engine: &Engine, account_id: &str, interval: Duration) -> anyhow::Result<()> {
    let mut live = engine.reader.watch_analytics(account_id)?;
    let mut last = live.current()?;
    print_summary(account_id, &last);

    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await;
    loop {
        let next = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            update = live.next() => match update {
                Some(summary) => summary,
                None => break,
            },
            _ = ticker.tick() => engine.reader.get_analytics(account_id)?,
        };
        if next != last {
            print_summary(account_id, &next);
            last = next;
        }
    }
    Ok(())
}

fn print_summary(account_id: &str, s: &AnalyticsSummary) {
    println!("{account_id}");
    println!("  views   total {:>8}  today {:>6}  week {:>6}  month {:>6}", s.total_views, s.today_views, s.week_views, s.month_views);
    println!("  clicks  total {:>8}  today {:>6}  week {:>6}  month {:>6}", s.total_clicks, s.today_clicks, s.week_clicks, s.month_clicks);
    if !s.top_links.is_empty() {
        println!("  top links:");
        for link in &s.top_links {
            println!("    {:>6}  {} ({})", link.stats.total_clicks, link.link_id, link.stats.url);
        }
    }
    if !s.traffic_sources.is_empty() {
        println!("  sources:");
        for (source, stats) in &s.traffic_sources {
            println!("    {source:<20} {:<9} views {:>6}  clicks {:>6}", stats.medium, stats.views, stats.clicks);
        }
    }
    if let Some(at) = s.last_updated {
        println!("  last updated {}", at.to_rfc3339());
    }
    println!();
}
