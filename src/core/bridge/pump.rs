//! The two forwarding loops.
//!
//! Each pump owns the reconnect procedure for the link it reads from and
//! only writes to the other one.

use crate::core::bridge::state::BridgeStatistics;
use crate::core::cancellation::CancellationToken;
use crate::domain::error::BridgeError;
use crate::infrastructure::serial::SerialLink;
use crate::infrastructure::tcp::NetworkLink;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Clone)]
pub(crate) struct PumpContext {
    pub serial: Arc<SerialLink>,
    pub network: Arc<NetworkLink>,
    pub token: CancellationToken,
    pub stats: Arc<BridgeStatistics>,
    pub retry_delay: Duration,
}

/// Device to client. Reopens the serial link whenever it fails.
pub(crate) async fn serial_to_network(ctx: PumpContext) {
    debug!("Serial -> network pump started");

    while !ctx.token.is_cancelled() {
        if !ctx.serial.is_open().await {
            ctx.serial.close().await;
            match ctx.serial.open(&ctx.token).await {
                Ok(true) => {
                    ctx.stats.record_serial_reconnect();
                    info!("Serial connection re-established");
                }
                Ok(false) => break,
                Err(e) => {
                    error!("Serial device cannot be reopened: {}", e);
                    break;
                }
            }
            continue;
        }

        match ctx.serial.read_frame().await {
            Ok(Some(frame)) => {
                if ctx.token.is_cancelled() {
                    break;
                }
                info!("A -> {}", frame);
                let Some(sent) = ctx.token.run_until_cancelled(ctx.network.write_frame(&frame)).await else {
                    break;
                };
                match sent {
                    Ok(_) => ctx.stats.record_serial_to_network(),
                    Err(BridgeError::NoClient) => {
                        debug!("No client attached, dropping frame from device");
                        ctx.stats.record_dropped();
                    }
                    Err(e) => {
                        warn!("Failed to forward frame to client: {}", e);
                        ctx.stats.record_dropped();
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                warn!("Serial connection reset: {}", e);
                ctx.serial.close().await;
            }
        }
    }

    info!("Serial -> network pump stopped");
}

/// Client to device. Owns accepting and replacing clients.
pub(crate) async fn network_to_serial(ctx: PumpContext) {
    debug!("Network -> serial pump started");

    while !ctx.token.is_cancelled() {
        if !ctx.network.has_client().await {
            match ctx.network.accept_blocking(&ctx.token).await {
                Ok(true) => ctx.stats.record_client_accepted(),
                Ok(false) => {}
                Err(e) => {
                    warn!("{}", e);
                    let _ = ctx
                        .token
                        .run_until_cancelled(tokio::time::sleep(ctx.retry_delay))
                        .await;
                }
            }
            continue;
        }

        // A pending read is dropped when a new client arrives first, which
        // releases the reader so it can be replaced.
        tokio::select! {
            biased;
            _ = ctx.token.cancelled() => break,
            accepted = ctx.network.accept_connection() => match accepted {
                Ok((stream, addr)) => {
                    ctx.network.attach(stream, addr).await;
                    ctx.stats.record_client_accepted();
                }
                Err(e) => warn!("{}", e),
            },
            read = ctx.network.read_frame() => match read {
                Ok(Some(frame)) => {
                    if ctx.token.is_cancelled() {
                        break;
                    }
                    info!("N -> {}", frame);
                    match ctx.serial.write_frame(&frame).await {
                        Ok(_) => ctx.stats.record_network_to_serial(),
                        Err(e) => {
                            warn!("Dropping frame for device: {}", e);
                            ctx.stats.record_dropped();
                        }
                    }
                }
                Ok(None) => debug!("Client gone, waiting for a new one"),
                Err(e) => {
                    warn!("{}", e);
                    ctx.network.disconnect().await;
                }
            },
        }
    }

    info!("Network -> serial pump stopped");
}
