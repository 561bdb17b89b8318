use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use shakefeed::catalog::Catalog;
use shakefeed::metrics::{self, Metrics};
use shakefeed::pipeline;
use shakefeed::publisher::{self, Queue, SqsQueue};
use shakefeed::settings::Settings;

#[tokio::main]
async fn main() {
    let settings = Settings::parse();

    tracing_subscriber::fmt()
        .with_max_level(if settings.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        })
        .init();

    let metrics = Arc::new(Metrics::new());
    {
        let metrics = metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = metrics::serve("127.0.0.1:8123", metrics).await {
                warn!(error = %e, "status endpoint failed");
            }
        });
    }

    let queue: Option<Arc<dyn Queue>> = if settings.dry_run {
        None
    } else {
        let Some(region) = settings.region.as_deref().filter(|r| !r.is_empty()) else {
            error!("unable to find region on the command line or in AWS_IMPACT_REGION");
            std::process::exit(1);
        };
        let Some(queue_name) = settings.queue.as_deref().filter(|q| !q.is_empty()) else {
            error!("unable to find queue on the command line or in AWS_IMPACT_QUEUE");
            std::process::exit(1);
        };

        match SqsQueue::connect(region, queue_name, &settings.key, &settings.secret).await {
            Ok(queue) => Some(Arc::new(queue)),
            Err(e) => {
                error!(error = %e, queue = queue_name, region, "unable to open queue");
                std::process::exit(1);
            }
        }
    };

    let (tx, rx) = mpsc::channel(32);
    let publisher = tokio::spawn(publisher::run(
        rx,
        queue,
        settings.resends,
        settings.wait,
        settings.verbose,
        metrics.clone(),
    ));

    let probation = chrono::Duration::from_std(settings.probation)
        .unwrap_or_else(|_| chrono::Duration::zero());
    let mut catalog = Catalog::new(settings.level, probation, metrics);
    match catalog.load(&settings.fdsn, chrono::Utc::now()).await {
        Ok(count) => info!(loaded = count, fdsn = %settings.fdsn, "catalog loaded"),
        Err(e) => {
            error!(error = %e, fdsn = %settings.fdsn, "unable to load catalog");
            std::process::exit(1);
        }
    }

    let outcome = pipeline::run(&settings, &mut catalog, tx).await;

    // the driver dropped its sender; let the publisher drain before deciding
    if let Err(e) = publisher.await {
        warn!(error = %e, "publisher task failed");
    }

    if let Err(e) = outcome {
        error!(error = %e, "fatal");
        std::process::exit(1);
    }
}
