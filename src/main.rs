use std::{process, sync::Arc, time::Instant};

use quire::{
    application::{error::AppError, jobs::JobHandler, registry::PurgeRequest},
    config::{self, Command, PurgeCdnArgs, Settings, TransformArgs},
    infra::{http, runtime::Runtime, telemetry},
};
use tracing::{Dispatch, Level, dispatcher, error, info, warn};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()
        .map_err(|err| AppError::unexpected(format!("failed to load configuration: {err}")))?;

    let command = cli_args
        .command
        .unwrap_or(Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;
    let runtime = Runtime::load(&settings).await?;

    match command {
        Command::Serve(_) => run_serve(&settings, runtime).await,
        Command::Clear(_) => {
            let report = runtime.registry.clear_all().await;
            println!("{}", if report.wiped { "Cache cleared" } else { "Cache was already empty" });
            Ok(())
        }
        Command::Stats(_) => {
            let stats = runtime.registry.cache_stats().await;
            println!("{}", stats.cached_pages);
            Ok(())
        }
        Command::Warm(_) => run_warm(&settings, &runtime).await,
        Command::PurgeCdn(args) => run_purge_cdn(&runtime, args).await,
        Command::Transform(args) => run_transform(&settings, &runtime, args).await,
        Command::RemoveTransforms(_) => {
            let removed = runtime.registry.media.remove_transforms().await?;
            runtime.persist(&settings).await?;
            println!("Removed transforms from {removed} assets");
            Ok(())
        }
    }
}

async fn run_serve(settings: &Settings, runtime: Runtime) -> Result<(), AppError> {
    let handler: Arc<dyn JobHandler> = Arc::new(runtime.registry.clone());
    let workers: Vec<_> = (0..settings.jobs.workers.get())
        .map(|index| {
            runtime
                .queue
                .spawn_worker(format!("job-worker-{index}"), handler.clone())
        })
        .collect();
    info!(workers = workers.len(), "job workers started");

    let result = http::serve_admin(
        settings.server.admin_addr,
        runtime.registry.clone(),
        shutdown_signal(),
    )
    .await;

    let deadline = Instant::now() + settings.server.graceful_shutdown;
    while !runtime.queue.is_empty() && Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    if !runtime.queue.is_empty() {
        warn!(pending = runtime.queue.len(), "shutting down with pending jobs");
    }

    for worker in workers {
        worker.abort();
        let _ = worker.await;
    }

    runtime.persist(settings).await?;
    result.map_err(AppError::from)
}

async fn run_warm(settings: &Settings, runtime: &Runtime) -> Result<(), AppError> {
    let warmer = &runtime.registry.warmer;
    let urls = warmer.list_urls_to_warm().await;
    info!(total = urls.len(), "warming urls");

    let report = warmer
        .warm(&urls, settings.cache.warm_concurrency, |progress| {
            info!(
                completed = progress.completed,
                total = progress.total,
                "warm progress"
            );
        })
        .await;

    println!(
        "Warmed {} of {} urls ({} failed)",
        report.succeeded, report.total, report.failed
    );
    Ok(())
}

async fn run_purge_cdn(runtime: &Runtime, args: PurgeCdnArgs) -> Result<(), AppError> {
    let request = if args.all {
        PurgeRequest::All { all: true }
    } else {
        PurgeRequest::Urls { urls: args.urls }
    };

    let outcome = runtime.registry.purge_cdn(&request).await?;
    if !outcome.success {
        let message = outcome.message.unwrap_or_default();
        let detail = if outcome.errors.is_empty() {
            message
        } else {
            format!("{message}: {}", outcome.errors.join("; "))
        };
        return Err(AppError::unexpected(format!("CDN purge failed: {detail}")));
    }

    println!("CDN purge accepted");
    Ok(())
}

async fn run_transform(
    settings: &Settings,
    runtime: &Runtime,
    args: TransformArgs,
) -> Result<(), AppError> {
    let enqueued = runtime
        .registry
        .transform_images(args.force, &args.volumes)
        .await?;
    let summary = runtime.drain().await;
    runtime.persist(settings).await?;

    println!(
        "Transformed {enqueued} assets ({} jobs completed, {} failed)",
        summary.completed, summary.failed
    );
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
