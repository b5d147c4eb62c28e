use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use collection_vault_daemon::config::{self, Config, Settings};
use collection_vault_daemon::{build_router, AppState};
use collection_vault_engine::{run_backup, run_restore, ArchiveCatalog, ProgressSink};
use collection_vault_storage::{redact_uri, DatabaseRegistry, UriConnector};
use tokio::sync::Mutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, PartialEq, Eq)]
enum Mode {
    Serve,
    Backup,
    Restore {
        archive: String,
        target: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let (cfg, mode) = parse_args(env::args().skip(1))?;
    let settings = Settings::from_env(&cfg);
    let registry = Arc::new(DatabaseRegistry::open(
        settings.registry_path(),
        &settings.database_url,
    )?);

    match mode {
        Mode::Serve => run_service(settings, registry).await,
        Mode::Backup => backup_once(&settings, &registry).await,
        Mode::Restore { archive, target } => {
            restore_once(&settings, &registry, &archive, target.as_deref()).await
        }
    }
}

/// Parse CLI args, returning the loaded config and the selected mode.
fn parse_args(args: impl IntoIterator<Item = String>) -> Result<(Config, Mode)> {
    let args: Vec<String> = args.into_iter().collect();
    let mut config_path: Option<PathBuf> = None;
    let mut target: Option<String> = None;
    let mut positional: Vec<String> = Vec::new();
    let mut i = 0;

    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                i += 1;
                if i >= args.len() {
                    bail!("--config requires a path argument");
                }
                config_path = Some(PathBuf::from(&args[i]));
            }
            "--target" => {
                i += 1;
                if i >= args.len() {
                    bail!("--target requires a database id");
                }
                target = Some(args[i].clone());
            }
            other => positional.push(other.to_owned()),
        }
        i += 1;
    }

    let mode = match positional.as_slice() {
        [] => Mode::Serve,
        [m] if m == "serve" => Mode::Serve,
        [m] if m == "backup" => Mode::Backup,
        [m, archive] if m == "restore" => Mode::Restore {
            archive: archive.clone(),
            target,
        },
        [m] if m == "restore" => bail!("restore requires an archive file name or path"),
        other => bail!("unrecognized arguments: {}", other.join(" ")),
    };

    let cfg = match config_path {
        Some(path) => {
            info!(?path, "loading config file");
            config::load_config(&path)?
        }
        None => Config::default(),
    };

    Ok((cfg, mode))
}

async fn backup_once(settings: &Settings, registry: &DatabaseRegistry) -> Result<()> {
    let (id, entry) = registry.resolve(None)?;
    info!(database = %id, uri = %redact_uri(&entry.uri), "running backup");
    let outcome = run_backup(
        Arc::new(UriConnector::new(entry.uri)),
        settings.backup_config(),
        ProgressSink::detached(),
    )
    .await;
    match (outcome.success, outcome.summary) {
        (true, Some(summary)) => {
            info!(archive = %summary.archive_path.display(), size_bytes = summary.size_bytes, "backup written");
            Ok(())
        }
        _ => bail!(
            "backup failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_owned())
        ),
    }
}

async fn restore_once(
    settings: &Settings,
    registry: &DatabaseRegistry,
    archive: &str,
    target: Option<&str>,
) -> Result<()> {
    let direct = PathBuf::from(archive);
    let archive_path = if direct.is_file() {
        direct
    } else {
        ArchiveCatalog::new(settings.backups_dir())
            .resolve(archive)
            .with_context(|| format!("locating backup archive {archive}"))?
    };
    let (id, entry) = registry.resolve(target)?;
    info!(archive = %archive_path.display(), database = %id, "running restore");

    let outcome = run_restore(
        archive_path,
        Arc::new(UriConnector::new(entry.uri)),
        settings.restore_config(),
        ProgressSink::detached(),
    )
    .await;
    if let Some(error) = outcome.error {
        bail!("restore failed: {error}");
    }
    if !outcome.success {
        let summary = outcome.summary.unwrap_or_default();
        bail!(
            "restore finished with failures: collections {:?}, directories {:?}",
            summary
                .failed_collections
                .iter()
                .map(|f| f.name.as_str())
                .collect::<Vec<_>>(),
            summary
                .failed_dirs
                .iter()
                .map(|f| f.dir.as_str())
                .collect::<Vec<_>>()
        );
    }
    Ok(())
}

async fn run_service(settings: Settings, registry: Arc<DatabaseRegistry>) -> Result<()> {
    let state = AppState {
        catalog: ArchiveCatalog::new(settings.backups_dir()),
        registry,
        backup: settings.backup_config(),
        restore: settings.restore_config(),
        restore_gate: Arc::new(Mutex::new(None)),
        csrf_token: settings.csrf_token.clone(),
        api_token: settings.api_token.clone(),
    };

    let addr: SocketAddr = settings
        .listen
        .parse()
        .with_context(|| format!("invalid listen address: {}", settings.listen))?;
    let app = build_router(state);

    info!(%addr, root = %settings.root.display(), "starting backup API server");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("shutdown requested");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn no_arguments_serves() {
        let (_, mode) = parse_args(args(&[])).unwrap();
        assert_eq!(mode, Mode::Serve);
    }

    #[test]
    fn restore_takes_archive_and_target() {
        let (_, mode) = parse_args(args(&[
            "restore",
            "backup-2024-01-01T00-00-00-000Z.zip",
            "--target",
            "staging",
        ]))
        .unwrap();
        assert_eq!(
            mode,
            Mode::Restore {
                archive: "backup-2024-01-01T00-00-00-000Z.zip".into(),
                target: Some("staging".into()),
            }
        );
    }

    #[test]
    fn restore_without_archive_is_rejected() {
        assert!(parse_args(args(&["restore"])).is_err());
        assert!(parse_args(args(&["--config"])).is_err());
        assert!(parse_args(args(&["frobnicate"])).is_err());
    }
}
