//! The driver loop: pulls packets off SeedLink, keeps the catalog fresh, and
//! hands intensity messages to the publisher.

use std::time::{Duration, Instant};

use chrono::Utc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::catalog::{Catalog, CatalogError};
use crate::parser;
use crate::seedlink::{Collect, SeedLink, SeedLinkError};
use crate::settings::Settings;
use crate::stream::Message;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("seedlink: {0}")]
    SeedLink(#[from] SeedLinkError),
    #[error("catalog reload: {0}")]
    Catalog(#[from] CatalogError),
}

/// Run until the server terminates the feed (Ok) or a fatal error occurs.
///
/// The catalog and every stream in it are owned here exclusively; the only
/// state shared with the publisher is the bounded message channel.
pub async fn run(
    settings: &Settings,
    catalog: &mut Catalog,
    tx: mpsc::Sender<Message>,
) -> Result<(), DriverError> {
    let mut slink = SeedLink::new(&settings.server);
    slink.set_network_delay(settings.netdly);
    slink.set_network_timeout(settings.netto);
    slink.set_keepalive(settings.keepalive);
    slink.parse_stream_list(&settings.streams, &settings.selectors)?;

    slink.connect().await?;
    slink.start().await?;

    let heartbeat = chrono::Duration::from_std(settings.flush)
        .unwrap_or_else(|_| chrono::Duration::zero());
    let mut reload_at = Instant::now() + settings.reload;

    loop {
        match slink.collect().await? {
            Collect::Terminate => {
                info!("seedlink terminated");
                break;
            }
            Collect::NoPacket => {
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
            Collect::Packet(packet) => {
                if !packet.is_data() {
                    continue;
                }

                if Instant::now() >= reload_at {
                    let count = catalog.load(&settings.fdsn, Utc::now()).await?;
                    info!(loaded = count, total = catalog.len(), "catalog reloaded");
                    reload_at = Instant::now() + settings.reload;
                }

                let record = match parser::decode(packet.payload()) {
                    Ok(record) => record,
                    Err(e) => {
                        warn!(error = %e, "discarding undecodable packet");
                        continue;
                    }
                };

                if let Some(message) = catalog.process(&record, heartbeat) {
                    if tx.send(message).await.is_err() {
                        // publisher is gone, nothing left to do
                        break;
                    }
                }
            }
        }
    }

    slink.disconnect().await;
    Ok(())
}
