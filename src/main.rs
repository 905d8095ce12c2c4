use clap::Parser;
use mi_thermometer_exporter::app::{self, Options};
use mi_thermometer_exporter::scanner::AdvertisementSource;
use prometheus::Registry;
use std::panic::{self, PanicHookInfo};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{Level, error, info};
use tracing_subscriber::EnvFilter;

/// Exit codes for the application
const EXIT_SUCCESS: i32 = 0;
const EXIT_ERROR: i32 = 1;
const EXIT_PANIC: i32 = 2;

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match log_level {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "warn" => Level::WARN,
            "error" => Level::ERROR,
            _ => Level::INFO,
        };
        EnvFilter::new("").add_directive(level.into())
    });

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

#[cfg(feature = "bluer")]
fn advertisement_source(options: &Options) -> Result<Arc<dyn AdvertisementSource>, String> {
    use mi_thermometer_exporter::scanner::bluer::BluerSource;

    Ok(Arc::new(BluerSource::new(options.adapter.clone())))
}

#[cfg(not(feature = "bluer"))]
fn advertisement_source(_options: &Options) -> Result<Arc<dyn AdvertisementSource>, String> {
    Err("built without a Bluetooth backend, enable the `bluer` feature".to_string())
}

/// Cancel `cancel` on SIGINT or SIGTERM.
async fn shutdown_on_signal(cancel: CancellationToken) {
    let interrupt = tokio::signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Could not install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
        _ = cancel.cancelled() => return,
    }

    cancel.cancel();
}

#[tokio::main]
async fn main() {
    // Set up panic hook to ensure clean exit codes for process managers
    // (e.g., systemd) that monitor exit status
    panic::set_hook(Box::new(move |info: &PanicHookInfo| {
        eprintln!("Panic! {}", info);
        std::process::exit(EXIT_PANIC);
    }));

    let options = Options::parse();
    init_tracing(&options.log_level);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        clean_period = ?options.clean_period,
        max_unseen = ?options.max_unseen,
        listen_address = %options.listen_address,
        "Starting mi-thermometer-exporter"
    );

    let source = match advertisement_source(&options) {
        Ok(source) => source,
        Err(why) => {
            error!("{}", why);
            std::process::exit(EXIT_ERROR);
        }
    };

    let cancel = CancellationToken::new();
    tokio::spawn(shutdown_on_signal(cancel.clone()));

    match app::run(options, source, Registry::new(), cancel).await {
        Ok(()) => {
            info!("Exiting");
            std::process::exit(EXIT_SUCCESS)
        }
        Err(why) => {
            error!(error = %why, "Exporter stopped with an error");
            std::process::exit(EXIT_ERROR);
        }
    }
}
