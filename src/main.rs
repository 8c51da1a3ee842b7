use std::io::Write;
use std::path::{Path, PathBuf};
use std::process;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tempfile::NamedTempFile;

use waymark_lib::archive::builder::{BuildOptions, MediaManifestEntry};
use waymark_lib::archive::schema::ExportMeta;
use waymark_lib::archive::validator::ValidationContext;
use waymark_lib::config::{normalize_prefix, WaymarkConfig};
use waymark_lib::media_store::FsMediaStore;
use waymark_lib::restore::RestoreContext;
use waymark_lib::service::{export_trip, restore_archive_bytes, RestoreOptions};
use waymark_lib::store::SqliteTripStore;
use waymark_lib::{db, migrate, Envelope};

#[derive(Debug, Parser)]
#[command(name = "waymark", about = "Trip archive export and restore", version)]
struct Cli {
    /// SQLite database path (overrides WAYMARK_DB_PATH).
    #[arg(long, value_name = "PATH", global = true)]
    db: Option<PathBuf>,

    /// Upload root holding media files (overrides WAYMARK_UPLOAD_ROOT).
    #[arg(long, value_name = "DIR", global = true)]
    uploads: Option<PathBuf>,

    /// Public URL prefix of stored media (overrides WAYMARK_PUBLIC_PREFIX).
    #[arg(long, value_name = "PREFIX", global = true)]
    public_prefix: Option<String>,

    /// Largest uncompressed archive accepted (overrides WAYMARK_MAX_ARCHIVE_BYTES).
    #[arg(long, value_name = "BYTES", global = true)]
    max_archive_bytes: Option<u64>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,
    /// Export one trip and its media to a zip archive.
    Export {
        trip_id: String,
        /// Destination file; never overwritten.
        #[arg(long, short, value_name = "FILE")]
        out: PathBuf,
    },
    /// Validate and restore a trip archive.
    Restore {
        archive: PathBuf,
        /// Validate and report without touching the database or upload root.
        #[arg(long)]
        dry_run: bool,
    },
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ExportReport {
    path: String,
    bytes: u64,
    meta: ExportMeta,
    media: Vec<MediaManifestEntry>,
}

#[tokio::main]
async fn main() {
    let _logging = match waymark_lib::logging::init_logging() {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    };

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            tracing::error!(target: "waymark", event = "cli_failed", error = %format!("{err:#}"));
            eprintln!("Error: {err:#}");
            process::exit(1);
        }
    }
}

fn resolve_config(cli: &Cli) -> Result<WaymarkConfig> {
    let mut config = WaymarkConfig::from_env().context("load configuration")?;
    if let Some(db) = &cli.db {
        config.db_path = db.clone();
    }
    if let Some(root) = &cli.uploads {
        config.upload_root = root.clone();
    }
    if let Some(prefix) = &cli.public_prefix {
        config.public_prefix = normalize_prefix(prefix);
    }
    if let Some(max) = cli.max_archive_bytes {
        config.max_archive_bytes = max;
    }
    Ok(config)
}

async fn open_store(config: &WaymarkConfig) -> Result<SqliteTripStore> {
    let pool = db::open_sqlite_pool(&config.db_path).await?;
    migrate::apply_migrations(&pool)
        .await
        .context("apply migrations")?;
    Ok(SqliteTripStore::new(pool))
}

async fn run(cli: Cli) -> Result<i32> {
    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Migrate => {
            let pool = db::open_sqlite_pool(&config.db_path).await?;
            let applied = migrate::apply_migrations(&pool)
                .await
                .context("apply migrations")?;
            println!("applied {applied} migration(s)");
            pool.close().await;
            Ok(0)
        }
        Command::Export { trip_id, out } => {
            let store = open_store(&config).await?;
            let media = FsMediaStore::new(&config.upload_root);
            let opts = BuildOptions {
                public_prefix: config.public_prefix.clone(),
                ..BuildOptions::default()
            };
            let envelope: Envelope<ExportReport> =
                match export_trip(&store, &media, &trip_id, &opts).await {
                    Ok(built) => {
                        write_new_file(&out, &built.bytes)?;
                        Envelope::ok(ExportReport {
                            path: out.display().to_string(),
                            bytes: built.bytes.len() as u64,
                            meta: built.meta,
                            media: built.media,
                        })
                    }
                    Err(err) => Envelope::err(&err),
                };
            store.pool().close().await;
            print_envelope(&envelope)
        }
        Command::Restore { archive, dry_run } => {
            let bytes = std::fs::read(&archive)
                .with_context(|| format!("read archive {}", archive.display()))?;
            let store = open_store(&config).await?;
            let ctx = RestoreContext::new(store, FsMediaStore::new(&config.upload_root));
            let opts = RestoreOptions {
                validation: ValidationContext {
                    public_prefix: config.public_prefix.clone(),
                    ..ValidationContext::default()
                },
                max_uncompressed_bytes: config.max_archive_bytes,
                dry_run,
            };
            let envelope = restore_archive_bytes(&ctx, &bytes, &opts).await;
            ctx.store.pool().close().await;
            print_envelope(&envelope)
        }
    }
}

fn print_envelope<T: Serialize>(envelope: &Envelope<T>) -> Result<i32> {
    println!(
        "{}",
        serde_json::to_string_pretty(envelope).context("serialize result")?
    );
    Ok(if envelope.error.is_some() { 2 } else { 0 })
}

fn write_new_file(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(parent)
        .with_context(|| format!("create temporary file in {}", parent.display()))?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist_noclobber(path)
        .map_err(|err| err.error)
        .with_context(|| format!("write archive {}", path.display()))?;
    Ok(())
}
