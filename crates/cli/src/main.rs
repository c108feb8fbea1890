//! CLI for the Keyward ownership resolver.
//!
//! Pipeline: load store -> resolve owning paths -> sole-owner analysis -> report.

use clap::{Args, Parser, Subcommand};
use keyward_core::{GroupId, ResourceId, Subject, UserId};
use keyward_resolver::reporter::OwnershipReport;
use keyward_resolver::sink::json_stream::JsonStreamSink;
use keyward_resolver::{orphans, LastOwnerGuard, OwnershipResolver, SoleOwnershipAnalyzer};
use keyward_store::{MemoryStore, Snapshot};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "keyward", version, about = "Resource ownership resolver")]
struct Cli {
    #[command(flatten)]
    source: Source,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Debug)]
struct Source {
    /// JSON snapshot to load. Falls back to the bundled demo data.
    #[arg(long, global = true, env = "KEYWARD_SNAPSHOT")]
    snapshot: Option<PathBuf>,

    /// Read from Postgres instead of a snapshot.
    #[cfg(feature = "postgres")]
    #[arg(long, global = true, env = "KEYWARD_DATABASE_URL")]
    database_url: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Resources the user owns.
    Owned {
        #[arg(short, long)]
        user: UserId,

        /// Count ownership inherited through groups.
        #[arg(short = 'g', long, default_value_t = false)]
        include_groups: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Shared resources the user is the only owner of.
    SoleOwned {
        #[arg(short, long)]
        user: UserId,

        #[arg(short = 'g', long, default_value_t = false)]
        include_groups: bool,

        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Full ownership report for one user.
    Report {
        #[arg(short, long)]
        user: UserId,

        #[arg(short = 'g', long, default_value_t = false)]
        include_groups: bool,

        #[arg(long, default_value_t = false)]
        json: bool,

        /// Sink output: "ndjson" writes NDJSON to stdout,
        /// "ndjson:/path/to/file" writes to file.
        #[arg(long)]
        sink: Option<SinkTarget>,
    },
    /// Check whether revoking one entry would orphan its resource.
    GuardRevoke {
        /// `user:<id>` or `group:<id>`.
        #[arg(short, long)]
        subject: Subject,

        #[arg(short, long)]
        resource: ResourceId,
    },
    /// Resources deleting a group would orphan.
    GuardDeleteGroup {
        #[arg(long)]
        group: GroupId,
    },
    /// Shared resources deleting a user would orphan.
    GuardDeleteUser {
        #[arg(short, long)]
        user: UserId,
    },
    /// Resources removing a user from a group would orphan.
    GuardLeaveGroup {
        #[arg(long)]
        group: GroupId,

        #[arg(short, long)]
        user: UserId,
    },
    /// Resources with no owner at all.
    Orphans {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

/// Where `report --sink` writes NDJSON rows.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SinkTarget {
    Stdout,
    File(PathBuf),
}

impl FromStr for SinkTarget {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "ndjson" {
            return Ok(SinkTarget::Stdout);
        }
        match value.strip_prefix("ndjson:") {
            Some(path) if !path.is_empty() => Ok(SinkTarget::File(PathBuf::from(path))),
            _ => Err(format!(
                "unknown sink: {value}. Use 'ndjson' or 'ndjson:/path'"
            )),
        }
    }
}

/// Exit status when a guard finds resources it would orphan.
const EXIT_BLOCKED: i32 = 3;

fn analyzer(source: &Source) -> Result<SoleOwnershipAnalyzer, Box<dyn std::error::Error>> {
    let snapshot = match &source.snapshot {
        Some(path) => Snapshot::from_path(path)?,
        None => {
            tracing::info!("no snapshot given, using bundled demo data");
            Snapshot::demo()
        }
    };
    let store = Arc::new(MemoryStore::from_snapshot(&snapshot)?);
    tracing::info!(
        users = snapshot.users.len(),
        groups = snapshot.groups.len(),
        permissions = snapshot.permissions.len(),
        "store loaded"
    );
    Ok(SoleOwnershipAnalyzer::new(OwnershipResolver::from_store(
        store,
    )))
}

#[cfg(feature = "postgres")]
async fn connect(source: &Source) -> Result<SoleOwnershipAnalyzer, Box<dyn std::error::Error>> {
    match &source.database_url {
        Some(url) => {
            let store = Arc::new(keyward_store::postgres::PgStore::connect(url).await?);
            Ok(SoleOwnershipAnalyzer::new(OwnershipResolver::from_store(
                store,
            )))
        }
        None => analyzer(source),
    }
}

#[cfg(not(feature = "postgres"))]
async fn connect(source: &Source) -> Result<SoleOwnershipAnalyzer, Box<dyn std::error::Error>> {
    analyzer(source)
}

fn print_ids<I>(ids: I, json: bool) -> Result<(), Box<dyn std::error::Error>>
where
    I: IntoIterator,
    I::Item: ToString,
{
    let mut ids: Vec<String> = ids.into_iter().map(|id| id.to_string()).collect();
    ids.sort();
    if json {
        println!("{}", serde_json::to_string_pretty(&ids)?);
    } else {
        for id in ids {
            println!("{id}");
        }
    }
    Ok(())
}

fn print_blocked(blocked: &[ResourceId]) {
    if blocked.is_empty() {
        println!("allowed");
    } else {
        println!("blocked, would orphan:");
        for resource in blocked {
            println!("  {resource}");
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let analyzer = connect(&cli.source).await?;

    match cli.command {
        Commands::Owned {
            user,
            include_groups,
            json,
        } => {
            let owned = analyzer
                .resolver()
                .resolve_owned_resources(&user, include_groups)
                .await?;
            print_ids(owned, json)?;
        }

        Commands::SoleOwned {
            user,
            include_groups,
            json,
        } => {
            let sole = analyzer
                .resolve_sole_owned_shared_resources(&user, include_groups)
                .await?;
            print_ids(sole, json)?;
        }

        Commands::Report {
            user,
            include_groups,
            json,
            sink,
        } => {
            let report = OwnershipReport::build(&analyzer, &user, include_groups).await?;

            if let Some(target) = sink {
                let (summary, rows) = report.to_rows();

                match target {
                    SinkTarget::Stdout => {
                        let mut s = JsonStreamSink::stdout();
                        s.write_summary(&summary)?;
                        s.write_rows(&rows)?;
                        let n = s.finish()?;
                        tracing::info!(rows = n, "ndjson sink: wrote to stdout");
                    }
                    SinkTarget::File(path) => {
                        let file = std::fs::File::create(&path)?;
                        let mut s = JsonStreamSink::new(file);
                        s.write_summary(&summary)?;
                        s.write_rows(&rows)?;
                        let n = s.finish()?;
                        tracing::info!(rows = n, path = %path.display(), "ndjson sink: wrote to file");
                    }
                }

                // Still print report to stderr so it's visible.
                eprint!("{}", report.render());
            } else if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", report.render());
            }
        }

        Commands::GuardRevoke { subject, resource } => {
            let guard = LastOwnerGuard::new(analyzer);
            let verdict = guard.check_revoke(&subject, &resource).await?;
            println!("{}", serde_json::to_string(&verdict)?);
            if verdict.is_blocked() {
                std::process::exit(EXIT_BLOCKED);
            }
        }

        Commands::GuardDeleteGroup { group } => {
            let blocked = LastOwnerGuard::new(analyzer)
                .check_group_deletion(&group)
                .await?;
            print_blocked(&blocked);
            if !blocked.is_empty() {
                std::process::exit(EXIT_BLOCKED);
            }
        }

        Commands::GuardDeleteUser { user } => {
            let blocked = LastOwnerGuard::new(analyzer)
                .check_user_deletion(&user)
                .await?;
            print_blocked(&blocked);
            if !blocked.is_empty() {
                std::process::exit(EXIT_BLOCKED);
            }
        }

        Commands::GuardLeaveGroup { group, user } => {
            let blocked = LastOwnerGuard::new(analyzer)
                .check_membership_removal(&group, &user)
                .await?;
            print_blocked(&blocked);
            if !blocked.is_empty() {
                std::process::exit(EXIT_BLOCKED);
            }
        }

        Commands::Orphans { json } => {
            let orphaned = orphans::scan(analyzer.resolver().store().as_ref()).await?;
            print_ids(orphaned, json)?;
        }
    }

    Ok(())
}
