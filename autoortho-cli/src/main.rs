//! `autoortho <root> <mountpoint>` — mount a synthetic, on-demand
//! filesystem over `root`'s flight-simulator scenery at `mountpoint`.
//! No flags, no env vars; tunables live in `~/.autoortho/config.ini`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use fuser::MountOption;
use tracing_appender::non_blocking::WorkerGuard;

use autoortho::error::MountError;
use autoortho::flight::XplaneRrefDecoder;
use autoortho::{
    default_log_dir, AutoOrthoConfig, AutoOrthoFs, FlightFollower, PlaceholderRenderer, TileCache,
};

#[derive(Parser)]
#[command(name = "autoortho", about = "On-demand orthoimagery tile cache for flight simulators")]
struct Args {
    /// Root scenery directory to project the filesystem over.
    root: PathBuf,
    /// Mountpoint to mount the projected filesystem at.
    mountpoint: PathBuf,
}

/// Initializes stdout + rotating-file logging. Returns the file appender's
/// [`WorkerGuard`]; dropping it flushes and stops the background writer
/// thread, so the caller must hold onto it for the process lifetime.
fn init_tracing() -> Option<WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let env_filter = || EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stdout_layer = fmt::layer().with_timer(fmt::time::LocalTime::rfc_3339());

    let file_layer_and_guard = default_log_dir().and_then(|dir| {
        if let Err(err) = std::fs::create_dir_all(&dir) {
            eprintln!("failed to create log directory {}: {err}", dir.display());
            return None;
        }
        let appender = tracing_appender::rolling::daily(&dir, "autoortho.log");
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let layer = fmt::layer()
            .with_ansi(false)
            .with_timer(fmt::time::LocalTime::rfc_3339())
            .with_writer(non_blocking);
        Some((layer, guard))
    });

    match file_layer_and_guard {
        Some((file_layer, guard)) => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(stdout_layer)
                .with(file_layer)
                .init();
            Some(guard)
        }
        None => {
            tracing_subscriber::registry()
                .with(env_filter())
                .with(stdout_layer)
                .init();
            None
        }
    }
}

/// Validates that `root` exists and is a directory, per §6's CLI surface
/// (mount failure, including an invalid root, exits nonzero).
fn validate_root(root: &PathBuf) -> Result<(), MountError> {
    if root.is_dir() {
        Ok(())
    } else {
        Err(MountError::InvalidRoot(root.clone()))
    }
}

fn main() -> ExitCode {
    let _log_guard = init_tracing();
    let args = Args::parse();

    if let Err(err) = validate_root(&args.root) {
        tracing::error!(error = %err, "invalid root");
        return ExitCode::FAILURE;
    }

    let config = match AutoOrthoConfig::load() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };

    let renderer = Arc::new(PlaceholderRenderer::default());
    let cache = match TileCache::new(config.clone(), renderer) {
        Ok(cache) => Arc::new(cache),
        Err(err) => {
            tracing::error!(error = %err, "failed to initialize tile cache");
            return ExitCode::FAILURE;
        }
    };

    let decoder = Arc::new(XplaneRrefDecoder::default());
    let follower = match FlightFollower::spawn(
        ("127.0.0.1", config.telemetry_port),
        Duration::from_secs(config.telemetry_timeout_secs),
        decoder,
    ) {
        Ok(follower) => follower,
        Err(err) => {
            tracing::error!(error = %err, "failed to start flight follower");
            return ExitCode::FAILURE;
        }
    };

    let fs = AutoOrthoFs::new(args.root.clone(), cache, follower.state(), config);

    let options = vec![
        MountOption::FSName("autoortho".to_string()),
        MountOption::AutoUnmount,
    ];

    let session = match fuser::spawn_mount2(fs, &args.mountpoint, &options) {
        Ok(session) => session,
        Err(source) => {
            let err = MountError::Mount {
                path: args.mountpoint.clone(),
                source,
            };
            tracing::error!(error = %err, "failed to mount");
            return ExitCode::FAILURE;
        }
    };

    tracing::info!(
        root = %args.root.display(),
        mountpoint = %args.mountpoint.display(),
        "mounted, waiting for unmount or Ctrl+C"
    );

    let (tx, rx) = std::sync::mpsc::channel();
    let result = ctrlc::set_handler(move || {
        let _ = tx.send(());
    });
    if let Err(err) = result {
        tracing::warn!(error = %err, "failed to install Ctrl+C handler");
    }

    // Block until either a signal arrives or the session unmounts on its
    // own (e.g. `fusermount -u` from outside this process).
    let _ = rx.recv();
    drop(session);

    tracing::info!("unmounted cleanly");
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_root_accepts_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(validate_root(&dir.path().to_path_buf()).is_ok());
    }

    #[test]
    fn validate_root_rejects_missing_path() {
        let err = validate_root(&PathBuf::from("/nonexistent/does/not/exist")).unwrap_err();
        assert!(matches!(err, MountError::InvalidRoot(_)));
    }

    #[test]
    fn validate_root_rejects_plain_file() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("not_a_dir");
        std::fs::write(&file_path, b"x").unwrap();
        assert!(validate_root(&file_path).is_err());
    }

    #[test]
    fn args_require_root_and_mountpoint() {
        let args = Args::try_parse_from(["autoortho", "/scenery", "/mnt/ortho"]).unwrap();
        assert_eq!(args.root, PathBuf::from("/scenery"));
        assert_eq!(args.mountpoint, PathBuf::from("/mnt/ortho"));
    }

    #[test]
    fn args_reject_missing_mountpoint() {
        assert!(Args::try_parse_from(["autoortho", "/scenery"]).is_err());
    }
}
