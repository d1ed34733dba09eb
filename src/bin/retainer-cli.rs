use std::sync::Arc;

use clap::{Parser, Subcommand};
use retainer::{
    Catalog, DeleteOptions, DeletionExecutor, NullSnapshotInterface, RetentionEvaluator,
    RetentionPolicy, S3Store, StoreConfig,
};

#[derive(Parser)]
#[command(name = "retainer", about = "Backup-lifecycle engine: catalog, retention, and WAL cleanup")]
struct Cli {
    /// Object store endpoint URL
    #[arg(long, env = "RETAINER_S3_ENDPOINT")]
    endpoint: String,

    /// Object store region
    #[arg(long, env = "RETAINER_S3_REGION")]
    region: String,

    /// Object store bucket name
    #[arg(long, env = "RETAINER_S3_BUCKET")]
    bucket: String,

    /// Object store access key
    #[arg(long, env = "RETAINER_S3_ACCESS_KEY")]
    access_key: String,

    /// Object store secret key
    #[arg(long, env = "RETAINER_S3_SECRET_KEY")]
    secret_key: String,

    /// Object store key prefix
    #[arg(long, env = "RETAINER_S3_PREFIX", default_value = "")]
    prefix: String,

    /// Server name this catalog belongs to
    #[arg(long, env = "RETAINER_SERVER_NAME")]
    server_name: String,

    /// Floor below which a single-backup deletion is refused
    #[arg(long, default_value_t = 0)]
    minimum_redundancy: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List backups in the catalog, oldest first
    ListBackups,
    /// List archived WAL segment names
    ListWals,
    /// Show metadata for one backup
    Show {
        /// Backup id, name, or reserved token (latest/oldest/...)
        reference: String,
    },
    /// Delete a single backup by id, name, or reserved token
    Delete {
        reference: String,
        /// Print the plan without touching the store
        #[arg(long)]
        dry_run: bool,
    },
    /// Evaluate a retention policy without deleting anything
    RetentionReport {
        /// e.g. "REDUNDANCY 3" or "RECOVERY WINDOW OF 4 WEEKS"
        policy: String,
    },
    /// Delete every OBSOLETE backup under a retention policy
    DeleteByPolicy {
        policy: String,
        #[arg(long)]
        dry_run: bool,
    },
    /// Pin a backup against retention-driven deletion
    Keep {
        reference: String,
        /// "full" or "standalone"
        target: String,
    },
    /// Remove an archival pin
    Unpin { reference: String },
}

fn store_config(cli: &Cli) -> StoreConfig {
    StoreConfig {
        endpoint: cli.endpoint.clone(),
        region: cli.region.clone(),
        bucket: cli.bucket.clone(),
        access_key: cli.access_key.clone(),
        secret_key: cli.secret_key.clone(),
        prefix: cli.prefix.clone(),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => {}
        Err(e) => {
            eprintln!("error: {e}");
            std::process::exit(e.exit_code());
        }
    }
}

async fn run(cli: Cli) -> retainer::Result<()> {
    let store = Arc::new(S3Store::new(&store_config(&cli))?);
    let mut catalog = Catalog::new(store, &cli.prefix, &cli.server_name);

    match cli.command {
        Commands::ListBackups => {
            let backups = catalog.list_backups().await?.to_vec();
            for b in &backups {
                let target = catalog.keep_target(&b.id).await?;
                let marker = target.map(|t| format!(" [{t}]")).unwrap_or_default();
                println!(
                    "{}  status={:?}  begin_wal={}  name={}{marker}",
                    b.id,
                    b.status,
                    b.begin_wal,
                    b.name.as_deref().unwrap_or("-")
                );
            }
            if !catalog.unreadable_backups().is_empty() {
                eprintln!("warning: unreadable backups: {:?}", catalog.unreadable_backups());
            }
        }
        Commands::ListWals => {
            for (name, key) in catalog.list_wals().await? {
                println!("{name}  {key}");
            }
        }
        Commands::Show { reference } => {
            let id = catalog.parse_backup_id(&reference).await?;
            let info = catalog.get_backup_info(&id).await?;
            match info {
                Some(info) => println!("{info:#?}"),
                None => println!("backup {id} not found"),
            }
        }
        Commands::Delete { reference, dry_run } => {
            let snapshots = NullSnapshotInterface::default();
            let mut executor = DeletionExecutor::new(&mut catalog, &snapshots, cli.minimum_redundancy);
            let opts = DeleteOptions {
                dry_run,
                ..Default::default()
            };
            let outcome = executor.delete_one(&reference, &opts).await?;
            if dry_run {
                for action in &outcome.planned_actions {
                    println!("{action}");
                }
            } else if outcome.found {
                println!("deleted {}", outcome.backup_id);
            } else {
                println!("backup {} not found, nothing to do", outcome.backup_id);
            }
        }
        Commands::RetentionReport { policy } => {
            let policy = RetentionPolicy::parse(&policy)?;
            let backups = catalog.list_backups().await?.to_vec();
            let mut pinned = std::collections::HashMap::new();
            for b in &backups {
                if let Some(target) = catalog.keep_target(&b.id).await? {
                    pinned.insert(b.id.clone(), target);
                }
            }
            let evaluator = RetentionEvaluator::new(policy, cli.minimum_redundancy);
            let verdicts = evaluator.evaluate(&backups, |id| pinned.contains_key(id));
            for (id, verdict) in verdicts {
                println!("{id}  {verdict:?}");
            }
        }
        Commands::DeleteByPolicy { policy, dry_run } => {
            let policy = RetentionPolicy::parse(&policy)?;
            let snapshots = NullSnapshotInterface::default();
            if dry_run {
                let backups = catalog.list_backups().await?.to_vec();
                let mut pinned = std::collections::HashMap::new();
                for b in &backups {
                    if let Some(target) = catalog.keep_target(&b.id).await? {
                        pinned.insert(b.id.clone(), target);
                    }
                }
                let evaluator = RetentionEvaluator::new(policy, cli.minimum_redundancy);
                let verdicts = evaluator.evaluate(&backups, |id| pinned.contains_key(id));
                let mut obsolete: Vec<&String> = verdicts
                    .iter()
                    .filter(|(_, v)| **v == retainer::Verdict::Obsolete)
                    .map(|(id, _)| id)
                    .collect();
                obsolete.sort();
                println!("would delete: {obsolete:?}");
            } else {
                let mut executor = DeletionExecutor::new(&mut catalog, &snapshots, cli.minimum_redundancy);
                let outcomes = executor.delete_by_policy(policy).await?;
                for outcome in outcomes {
                    println!("deleted {}", outcome.backup_id);
                }
            }
        }
        Commands::Keep { reference, target } => {
            let id = catalog.parse_backup_id(&reference).await?;
            catalog.pin(&id, &target).await?;
            println!("pinned {id} as {target}");
        }
        Commands::Unpin { reference } => {
            let id = catalog.parse_backup_id(&reference).await?;
            catalog.unpin(&id).await?;
            println!("unpinned {id}");
        }
    }

    Ok(())
}
