use std::process::ExitCode;

use video_studio::{AppConfig, FileHandle, QueueSnapshot, UploadManager, UploadStatus};

#[tokio::main]
async fn main() -> ExitCode {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    if let Err(e) = init_logging() {
        eprintln!("Failed to initialize logging: {}", e);
        return ExitCode::FAILURE;
    }

    match run().await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("❌ {}", e);
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let paths: Vec<String> = std::env::args().skip(1).collect();
    if paths.is_empty() {
        eprintln!("usage: video_studio <file>...");
        return Ok(ExitCode::from(2));
    }

    let config = AppConfig::from_env()?;
    match &config.upload_endpoint {
        Some(endpoint) => tracing::info!("Uploading to {}", endpoint),
        None => tracing::info!("UPLOAD_ENDPOINT not set, using simulated transfers"),
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        let file = FileHandle::from_path(path)
            .await
            .map_err(|e| format!("{}: {}", path, e))?;
        files.push(file);
    }

    let manager = UploadManager::from_config(&config);
    manager.enqueue(files).await;

    // print every snapshot until nothing is in flight
    let mut rx = manager.subscribe();
    loop {
        let snapshot = rx.borrow_and_update().clone();
        print_snapshot(&snapshot)?;
        if snapshot.iter().all(|r| r.is_terminal()) {
            break;
        }

        tokio::select! {
            changed = rx.changed() => changed?,
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, cancelling uploads");
                manager.shutdown().await;
                print_snapshot(&manager.snapshot())?;
                return Ok(ExitCode::from(130));
            }
        }
    }

    manager.flush_thumbnails().await;
    let failed = manager
        .snapshot()
        .iter()
        .filter(|r| r.status == UploadStatus::Error)
        .count();

    manager.clear_completed().await;
    print_snapshot(&manager.snapshot())?;
    manager.shutdown().await;

    if failed > 0 {
        tracing::warn!("{} upload(s) failed", failed);
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn print_snapshot(snapshot: &QueueSnapshot) -> Result<(), serde_json::Error> {
    println!("{}", serde_json::to_string(snapshot.as_ref())?);
    Ok(())
}

fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    // Get log level from environment or default by build profile
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,video_studio=trace,reqwest=info,hyper=info".to_string()
        } else {
            "info,video_studio=info,reqwest=warn,hyper=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // stdout carries the snapshots, so logs go to stderr
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    } else {
        fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();

    tracing::info!("🎬 Video Studio starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Build mode: {}", if cfg!(debug_assertions) { "development" } else { "production" });
    tracing::info!("Log level: {}", log_level);

    Ok(())
}
