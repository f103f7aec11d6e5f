//! Configuração do `tracing` para o host e para o processo worker.
//!
//! O stdout do worker é reservado para o canal de progresso, então nenhum
//! layer escreve nele.

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::error::FarmError;

/// Filtro padrão do log de sessão do worker.
pub const WORKER_FILE_FILTER: &str = "framefarm=debug";

// Filtro do `RUST_LOG` se definido, senão o padrão dado.
fn env_or(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Logging do host: apenas stderr, `warn` por padrão ou `info` com `--verbose`.
pub fn init_host(verbose: bool) {
    let default = if verbose { "framefarm=info" } else { "framefarm=warn" };
    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_filter(env_or(default)),
        )
        .try_init();
    if installed.is_err() {
        tracing::debug!("Subscriber already installed");
    }
}

/// Logging do worker: arquivo de sessão em `log_path` e stderr só para avisos.
pub fn init_worker(log_path: &Path) -> Result<(), FarmError> {
    if let Some(parent) = log_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(log_path)?;

    let installed = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(Mutex::new(file))
                .with_ansi(false)
                .with_filter(env_or(WORKER_FILE_FILTER)),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_filter(EnvFilter::new("framefarm=warn")),
        )
        .try_init();
    if installed.is_err() {
        tracing::debug!("Subscriber already installed");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn worker_log_file_is_created() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("job").join("requestor.log");
        init_worker(&path).unwrap();
        tracing::warn!("written to the session log");
        assert!(path.exists());
    }
}
