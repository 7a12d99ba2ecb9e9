//! Application wiring: explicitly constructed services with explicit
//! lifecycle, owned by the process entry point and passed down. No ambient
//! global connections.

use std::sync::Arc;

use axum::Extension;
use axum::Router;

use inspecta_analysis::{InMemoryInspectionRepo, InspectionRepo, ScriptedVisionClient, VisionClient};
use inspecta_events::{InMemoryBus, MessageBus};
use inspecta_infra::broker::{Broker, InMemoryBroker};
use inspecta_infra::config::OrchestratorConfig;
use inspecta_infra::gate::BackpressureGate;
use inspecta_infra::jobs::{InMemoryJobStore, JobStore};
use inspecta_infra::worker::{PhotoAnalysisHandler, WorkerConfig, WorkerRuntime};

pub mod errors;
pub mod routes;

/// Everything the HTTP layer and the embedded worker need, built once.
pub struct AppServices {
    pub config: OrchestratorConfig,
    pub bus: Arc<dyn MessageBus>,
    pub broker: Arc<dyn Broker>,
    pub store: Arc<dyn JobStore>,
    pub inspections: Arc<dyn InspectionRepo>,
    pub vision: Arc<dyn VisionClient>,
    pub gate: BackpressureGate,
}

impl AppServices {
    /// In-memory wiring for tests, dev, and single-process deployments.
    pub fn in_memory(config: OrchestratorConfig) -> Arc<Self> {
        let bus: Arc<dyn MessageBus> = Arc::new(InMemoryBus::new());
        let broker: Arc<dyn Broker> = Arc::new(InMemoryBroker::new());
        let store: Arc<dyn JobStore> = Arc::new(InMemoryJobStore::new(bus.clone()));
        let inspections: Arc<dyn InspectionRepo> = InMemoryInspectionRepo::arc();
        let vision: Arc<dyn VisionClient> = Arc::new(ScriptedVisionClient::new());
        Self::assemble(config, bus, broker, store, inspections, vision)
    }

    /// Redis-backed wiring; backend choice comes from configuration, never
    /// from business logic.
    #[cfg(feature = "redis")]
    pub fn redis(
        config: OrchestratorConfig,
        inspections: Arc<dyn InspectionRepo>,
        vision: Arc<dyn VisionClient>,
    ) -> anyhow::Result<Arc<Self>> {
        use inspecta_infra::broker::{
            sorted::SortedBrokerConfig, streams::StreamBrokerConfig, RedisSortedBroker,
            RedisStreamBroker,
        };
        use inspecta_infra::config::BrokerBackend;
        use inspecta_infra::event_bus::RedisPubSubBus;
        use inspecta_infra::jobs::RedisJobStore;

        let bus: Arc<dyn MessageBus> = Arc::new(RedisPubSubBus::new(
            &config.relay_url,
            config.relay_channel.clone(),
        )?);
        let broker: Arc<dyn Broker> = match config.backend {
            BrokerBackend::Streams => Arc::new(RedisStreamBroker::new(
                &config.broker_url,
                StreamBrokerConfig {
                    prefetch: config.prefetch,
                    redeliver_after: config.visibility,
                    ..Default::default()
                },
            )?),
            BrokerBackend::Sorted => Arc::new(RedisSortedBroker::new(
                &config.broker_url,
                SortedBrokerConfig {
                    visibility: config.visibility,
                    ..Default::default()
                },
            )?),
        };
        let store: Arc<dyn JobStore> =
            Arc::new(RedisJobStore::new(&config.broker_url, "inspecta", bus.clone())?);
        Ok(Self::assemble(config, bus, broker, store, inspections, vision))
    }

    fn assemble(
        config: OrchestratorConfig,
        bus: Arc<dyn MessageBus>,
        broker: Arc<dyn Broker>,
        store: Arc<dyn JobStore>,
        inspections: Arc<dyn InspectionRepo>,
        vision: Arc<dyn VisionClient>,
    ) -> Arc<Self> {
        let gate = BackpressureGate::new(broker.clone(), store.clone(), config.max_pending);
        Arc::new(Self {
            config,
            bus,
            broker,
            store,
            inspections,
            vision,
            gate,
        })
    }

    /// Build the worker runtime with the photo-analysis handler registered.
    pub fn worker_runtime(&self) -> WorkerRuntime {
        let mut runtime = WorkerRuntime::new(
            self.broker.clone(),
            self.store.clone(),
            WorkerConfig {
                concurrency: self.config.concurrency,
                reconnect: self.config.reconnect.clone(),
                ..Default::default()
            },
        );
        runtime.register(Arc::new(PhotoAnalysisHandler::new(
            self.store.clone(),
            self.inspections.clone(),
            self.vision.clone(),
        )));
        runtime
    }
}

/// Assemble the HTTP router over the prepared services.
pub fn build_router(services: Arc<AppServices>) -> Router {
    routes::router().layer(Extension(services))
}
