use crate::core::bridge::pump::{self, PumpContext};
use crate::core::bridge::state::{BridgeState, BridgeStatistics, StatisticsSnapshot};
use crate::core::cancellation::CancellationToken;
use crate::domain::config::BridgeConfig;
use crate::domain::error::BridgeResult;
use crate::infrastructure::serial::{PortOpener, SerialLink};
use crate::infrastructure::tcp::NetworkLink;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Passthrough between one serial device and one TCP client
pub struct Bridge {
    serial: Arc<SerialLink>,
    network: Arc<NetworkLink>,
    token: CancellationToken,
    state: watch::Sender<BridgeState>,
    stats: Arc<BridgeStatistics>,
    retry_delay: Duration,
}

impl Bridge {
    pub fn new(
        serial: SerialLink,
        network: NetworkLink,
        token: CancellationToken,
        retry_delay: Duration,
    ) -> Self {
        let (state, _) = watch::channel(BridgeState::Starting);

        Self {
            serial: Arc::new(serial),
            network: Arc::new(network),
            token,
            state,
            stats: Arc::new(BridgeStatistics::new()),
            retry_delay,
        }
    }

    /// Build a bridge for a real serial port from configuration.
    ///
    /// Binds the listener right away. With `bind_retry` unset a bind failure
    /// is returned; otherwise binding is retried until `token` is cancelled,
    /// in which case `Ok(None)` is returned.
    pub async fn from_config(config: &BridgeConfig, token: CancellationToken) -> BridgeResult<Option<Self>> {
        let opener = PortOpener::new(&config.serial)?;
        let retry_delay = config.global.reconnect_delay();

        let network = if config.network.bind_retry {
            match NetworkLink::bind_with_retry(&config.network, retry_delay, &token).await? {
                Some(link) => link,
                None => return Ok(None),
            }
        } else {
            NetworkLink::bind(&config.network).await?
        };

        let serial = SerialLink::new(Arc::new(opener), config.serial.read_timeout(), retry_delay)
            .with_max_frame_len(config.serial.max_frame_len);
        Ok(Some(Self::new(serial, network, token, retry_delay)))
    }

    pub fn state(&self) -> BridgeState {
        *self.state.borrow()
    }

    /// Watch lifecycle transitions
    pub fn subscribe(&self) -> watch::Receiver<BridgeState> {
        self.state.subscribe()
    }

    pub fn statistics(&self) -> StatisticsSnapshot {
        let mut snapshot = self.stats.snapshot();
        snapshot.undecodable_frames = self.serial.undecodable_frames() + self.network.undecodable_frames();
        snapshot
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.network.local_addr()
    }

    pub fn serial(&self) -> &SerialLink {
        &self.serial
    }

    pub fn network(&self) -> &NetworkLink {
        &self.network
    }

    /// Request a graceful stop; [`Bridge::run`] returns once both pumps exit
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Run until shut down and return the final counters.
    ///
    /// Errors only for configuration problems found while opening the
    /// serial device.
    pub async fn run(&self) -> BridgeResult<StatisticsSnapshot> {
        self.set_state(BridgeState::Starting);

        let result = self.start().await;
        let outcome = match result {
            Ok(true) => {
                self.set_state(BridgeState::Running);
                self.forward().await;
                Ok(())
            }
            Ok(false) => Ok(()),
            Err(e) => Err(e),
        };

        self.set_state(BridgeState::Stopping);
        self.serial.close().await;
        self.network.disconnect().await;
        self.set_state(BridgeState::Stopped);

        let snapshot = self.statistics();
        info!(
            "Bridge stopped: {} frames to client, {} frames to device, {} dropped, {} serial reconnects, {} clients",
            snapshot.serial_to_network,
            snapshot.network_to_serial,
            snapshot.dropped_frames,
            snapshot.serial_reconnects,
            snapshot.clients_accepted
        );

        outcome.map(|_| snapshot)
    }

    /// Initial serial open, greeting read and the first client.
    ///
    /// `Ok(false)` when cancelled before both sides came up.
    async fn start(&self) -> BridgeResult<bool> {
        if !self.serial.open(&self.token).await? {
            return Ok(false);
        }

        // The device announces itself once after opening; consume that here
        // so it never races the pumps.
        match self.serial.read_frame().await {
            Ok(Some(greeting)) => info!("Successfully connected to device: {}", greeting),
            Ok(None) => info!("Successfully connected to device"),
            Err(e) => warn!("Device failed right after opening: {}", e),
        }

        info!("Listening for network client on {}", self.network.local_addr());
        while !self.token.is_cancelled() {
            match self.network.accept_blocking(&self.token).await {
                Ok(true) => {
                    self.stats.record_client_accepted();
                    return Ok(true);
                }
                Ok(false) => debug!("Still waiting for a network client"),
                Err(e) => {
                    warn!("{}", e);
                    let _ = self
                        .token
                        .run_until_cancelled(tokio::time::sleep(self.retry_delay))
                        .await;
                }
            }
        }

        Ok(false)
    }

    async fn forward(&self) {
        let ctx = PumpContext {
            serial: Arc::clone(&self.serial),
            network: Arc::clone(&self.network),
            token: self.token.clone(),
            stats: Arc::clone(&self.stats),
            retry_delay: self.retry_delay,
        };

        let serial_pump = tokio::spawn(pump::serial_to_network(ctx.clone()));
        let network_pump = tokio::spawn(pump::network_to_serial(ctx));

        self.token.cancelled().await;
        self.set_state(BridgeState::Stopping);
        info!("Attempting to close passthrough bridge");

        let (serial_result, network_result) = tokio::join!(serial_pump, network_pump);
        if let Err(e) = serial_result {
            error!("Serial pump ended abnormally: {}", e);
        }
        if let Err(e) = network_result {
            error!("Network pump ended abnormally: {}", e);
        }
    }

    fn set_state(&self, next: BridgeState) {
        self.state.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                info!("Bridge {} -> {}", *state, next);
                *state = next;
                true
            }
        });
    }
}

impl Drop for Bridge {
    fn drop(&mut self) {
        if matches!(self.state(), BridgeState::Running | BridgeState::Stopping) {
            warn!("Bridge dropped while still running - links may not close gracefully");
        }
    }
}

