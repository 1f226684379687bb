//! Model Fetch command line
//!
//! Usage: `model-fetch <list|status|download ID|select ID|delete ID>`

use std::io::Write;
use std::process::ExitCode;

use model_fetch::app::App;
use model_fetch::download::{DownloadError, Phase};
use model_fetch::storage::huggingface::format_size;
use model_fetch::storage::settings::load_settings;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: model-fetch <list | status | download <id> | select <id> | delete <id>>";

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Download(#[from] DownloadError),
    #[error("{0}")]
    Failed(String),
    #[error("{}", USAGE)]
    Usage,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let app = match App::start(load_settings()) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Startup failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&app, &args).await;
    app.shutdown();

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(app: &App, args: &[String]) -> Result<(), CliError> {
    let manager = app.manager();
    match (args.first().map(String::as_str), args.get(1)) {
        (Some("list"), None) => {
            let selected = manager.snapshot().selected_model_id;
            for model in app.store().catalog().iter() {
                let marker = if selected.as_deref() == Some(model.id.as_str()) {
                    "*"
                } else if app.store().is_downloaded(&model.id) {
                    "+"
                } else {
                    " "
                };
                println!("{} {:<24} {:>8}  {}", marker, model.id, model.size_label, model.name);
            }
            Ok(())
        }
        (Some("status"), None) => {
            let snapshot = manager.refresh_status().await?;
            println!("network:  {:?}", app.network_status());
            println!("phase:    {:?}", snapshot.phase);
            println!(
                "selected: {}",
                snapshot.selected_model_id.as_deref().unwrap_or("-")
            );
            if let Some(error) = snapshot.last_error {
                println!("error:    {}", error);
            }
            Ok(())
        }
        (Some("download"), Some(id)) => download(app, id).await,
        (Some("select"), Some(id)) => {
            manager.select_model(id).await?;
            println!("Selected {}", id);
            Ok(())
        }
        (Some("delete"), Some(id)) => {
            manager.delete_model(id).await?;
            let selected = manager.snapshot().selected_model_id;
            println!(
                "Deleted {}; selected model is now {}",
                id,
                selected.as_deref().unwrap_or("none")
            );
            Ok(())
        }
        _ => Err(CliError::Usage),
    }
}

async fn download(app: &App, model_id: &str) -> Result<(), CliError> {
    let manager = app.manager();
    let mut updates = manager.subscribe();
    manager.start_download(model_id).await?;
    let generation = manager.snapshot().generation;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                manager.stop_download().await?;
                println!("\nDownload stopped");
                return Ok(());
            }
            changed = updates.changed() => {
                if changed.is_err() {
                    return Err(DownloadError::ManagerClosed.into());
                }
            }
        }

        let snapshot = updates.borrow_and_update().clone();
        if snapshot.generation != generation {
            continue;
        }
        match snapshot.phase {
            Phase::Downloading => {
                print!(
                    "\r{:>5.1}%  {} / {}",
                    snapshot.progress * 100.0,
                    format_size(snapshot.bytes_written),
                    format_size(snapshot.bytes_expected)
                );
                let _ = std::io::stdout().flush();
            }
            Phase::Installing => println!("\nInstalling..."),
            Phase::Ready => {
                println!("Downloaded and selected {}", model_id);
                return Ok(());
            }
            Phase::Failed => {
                println!();
                let message = snapshot.last_error.unwrap_or_default();
                return Err(CliError::Failed(message));
            }
            Phase::Idle => return Ok(()),
        }
    }
}
