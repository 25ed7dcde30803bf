use std::num::NonZeroUsize;
use std::sync::Arc;

use crate::Settings;
use crate::bus::InProcessBus;
use crate::hub::dispatcher::Dispatcher;
use crate::hub::registry::ConnectionRegistry;
use crate::ingress::Ingress;
use crate::repository::Repository;

#[derive(Debug, Clone)]
#[must_use]
pub struct SharedState {
    pub repository: Repository,
    pub registry: Arc<ConnectionRegistry>,
    pub ingress: Arc<Ingress>,
    pub bus: InProcessBus,
    pub bus_topic: Arc<str>,
    pub connection_buffer: NonZeroUsize,
}

impl SharedState {
    pub fn new(repository: Repository, bus: InProcessBus, settings: &Settings) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let dispatcher = Dispatcher::new(registry.clone(), settings.send_timeout());
        Self {
            repository,
            registry,
            ingress: Arc::new(Ingress::new(dispatcher)),
            bus,
            bus_topic: Arc::from(settings.bus_topic.as_str()),
            connection_buffer: settings.connection_buffer,
        }
    }
}
