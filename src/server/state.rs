use axum::extract::FromRef;

use crate::pipeline::Coordinator;
use crate::render::ArtifactStore;
use std::sync::Arc;
use std::time::Instant;

use super::ServerConfig;

pub type GuardedCoordinator = Arc<Coordinator>;

#[derive(Clone)]
pub struct ServerState {
    pub config: ServerConfig,
    pub start_time: Instant,
    pub coordinator: GuardedCoordinator,
    pub store: ArtifactStore,
}

impl ServerState {
    pub fn new(config: ServerConfig, coordinator: GuardedCoordinator) -> Self {
        let store = coordinator.store().clone();
        ServerState {
            config,
            start_time: Instant::now(),
            coordinator,
            store,
        }
    }
}

impl FromRef<ServerState> for GuardedCoordinator {
    fn from_ref(input: &ServerState) -> Self {
        input.coordinator.clone()
    }
}

impl FromRef<ServerState> for ArtifactStore {
    fn from_ref(input: &ServerState) -> Self {
        input.store.clone()
    }
}
