//! Active-network context
//!
//! One context is constructed per process lifetime and handed to every
//! component. A network switch mutates the active key and bumps a generation
//! counter; long-running work captures the generation at start and abandons
//! its writes when the counter has moved on.

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct NetworkState {
    network_id: String,
    generation: u64,
}

/// Shared handle on the currently active network.
#[derive(Debug)]
pub struct NetworkContext {
    state: RwLock<NetworkState>,
}

impl NetworkContext {
    pub fn new(network_id: impl Into<String>) -> Self {
        Self {
            state: RwLock::new(NetworkState {
                network_id: network_id.into(),
                generation: 0,
            }),
        }
    }

    pub async fn network_id(&self) -> String {
        self.state.read().await.network_id.clone()
    }

    pub async fn generation(&self) -> u64 {
        self.state.read().await.generation
    }

    /// Network id and generation in one read, for work that must later check
    /// it still runs against the same network.
    pub async fn snapshot(&self) -> (String, u64) {
        let state = self.state.read().await;
        (state.network_id.clone(), state.generation)
    }

    /// Whether the given generation is still the active one.
    pub async fn is_current(&self, generation: u64) -> bool {
        self.state.read().await.generation == generation
    }

    /// Switch to another network, invalidating all in-flight work. Returns
    /// the previous network id.
    pub async fn switch(&self, network_id: impl Into<String>) -> String {
        let mut state = self.state.write().await;
        let previous = std::mem::replace(&mut state.network_id, network_id.into());
        state.generation += 1;
        log::info!(
            "Network switched from {} to {} (generation {})",
            previous,
            state.network_id,
            state.generation
        );
        previous
    }
}
