//! Process-level wiring.
//!
//! `BridgeService` is the context object owned by the entry point. It holds
//! the dispatch worker, the delivery queue and the control endpoint, which
//! share one parameter store, and tears them down in dependency order.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};

use crate::api::{ApiConfig, ControlHandle, ControlServer};
use crate::channel::FrameChannel;
use crate::config::BridgeConfig;
use crate::delivery::{Collector, DeliveryQueue, DeliveryStats, HttpCollector};
use crate::detect::Detector;
use crate::dispatch::{DispatchControls, DispatchHandle, DispatchLoop, DispatchStats};
use crate::params::ParameterStore;

pub struct BridgeService {
    dispatch: DispatchHandle,
    delivery: DeliveryQueue,
    control: ControlHandle,
}

impl BridgeService {
    /// Start every component with the real HTTP collector.
    pub async fn start(cfg: &BridgeConfig, detector: Box<dyn Detector>) -> Result<Self> {
        let collector = Arc::new(HttpCollector::new(cfg.send_timeout));
        Self::start_with_collector(cfg, detector, collector).await
    }

    /// Start with a caller-supplied collector. Must run inside a tokio runtime.
    pub async fn start_with_collector(
        cfg: &BridgeConfig,
        detector: Box<dyn Detector>,
        collector: Arc<dyn Collector>,
    ) -> Result<Self> {
        let channel = FrameChannel::open(&cfg.shm_dir, cfg.shm_port())
            .context("frame channel is required to run")?;
        log::info!("frame channel bound at {}", channel.path().display());

        if let Some(dir) = &cfg.debug_dir {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("failed to create debug directory {}", dir.display()))?;
            log::info!("debug snapshots enabled: {}", dir.display());
        }

        let store = Arc::new(ParameterStore::new());
        let delivery = DeliveryQueue::start(collector);

        let control = ControlServer::new(
            ApiConfig {
                addr: cfg.api_addr()?.to_string(),
            },
            store.clone(),
        )
        .spawn()
        .await?;
        log::info!("control endpoint listening on {}", control.addr);

        let dispatch = DispatchLoop::new(channel, control.addr.port(), store, detector)
            .with_debug_dir(cfg.debug_dir.clone());
        dispatch.controls().set_sink(Arc::new(delivery.sender()));
        let dispatch = dispatch.spawn()?;

        Ok(Self {
            dispatch,
            delivery,
            control,
        })
    }

    pub fn controls(&self) -> &DispatchControls {
        self.dispatch.controls()
    }

    pub fn control_addr(&self) -> std::net::SocketAddr {
        self.control.addr
    }

    pub fn delivery_stats(&self) -> Arc<DeliveryStats> {
        self.delivery.stats()
    }

    /// Stop accepting updates, stop polling, then drain the in-flight send.
    pub async fn shutdown(self) -> Result<DispatchStats> {
        let Self {
            dispatch,
            delivery,
            control,
        } = self;

        control.stop().await?;

        dispatch.controls().clear_sink();
        let stats = tokio::task::spawn_blocking(move || dispatch.stop())
            .await
            .map_err(|_| anyhow!("dispatch shutdown task panicked"))??;

        delivery.stop().await;
        Ok(stats)
    }
}
