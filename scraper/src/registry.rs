//! In-memory server registry with optional on-disk snapshots
//!
//! Stands in for the persistent store: it answers the scraper's events and
//! can save/load its records with bincode so a restart keeps the address
//! list.

use crate::error::ScraperError;
use crate::scraper::ScraperEvents;
use log::{debug, info};
use protocol::Server;
use std::collections::HashMap;
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
pub struct MemoryRegistry {
    servers: RwLock<HashMap<String, Server>>,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn servers(&self) -> RwLockReadGuard<'_, HashMap<String, Server>> {
        self.servers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn servers_mut(&self) -> RwLockWriteGuard<'_, HashMap<String, Server>> {
        self.servers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Loads a snapshot written by [`save`](Self::save); a missing file
    /// gives an empty registry
    pub fn load(path: &Path) -> Result<Self, ScraperError> {
        if !path.exists() {
            info!("No snapshot at {}, starting empty", path.display());
            return Ok(Self::new());
        }

        let bytes = std::fs::read(path)?;
        let servers: Vec<Server> = bincode::deserialize(&bytes)?;
        info!("Loaded {} servers from {}", servers.len(), path.display());

        let registry = Self::new();
        {
            let mut map = registry.servers_mut();
            for server in servers {
                map.insert(server.core.address.clone(), server);
            }
        }
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> Result<(), ScraperError> {
        let servers: Vec<Server> = self.servers().values().cloned().collect();
        let bytes = bincode::serialize(&servers)?;
        std::fs::write(path, bytes)?;
        info!("Saved {} servers to {}", servers.len(), path.display());
        Ok(())
    }

    /// Addresses of every stored record, active or not
    pub fn addresses(&self) -> Vec<String> {
        self.servers().keys().cloned().collect()
    }

    pub fn get(&self, address: &str) -> Option<Server> {
        self.servers().get(address).cloned()
    }

    pub fn len(&self) -> usize {
        self.servers().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers().is_empty()
    }

    /// Number of records currently marked active
    pub fn active_count(&self) -> usize {
        self.servers().values().filter(|s| s.active).count()
    }
}

impl ScraperEvents for MemoryRegistry {
    fn on_archive(&self, address: &str) {
        if let Some(server) = self.servers_mut().get_mut(address) {
            server.active = false;
            debug!("Marked {} inactive", address);
        }
    }

    fn on_remove(&self, address: &str) {
        if self.servers_mut().remove(address).is_some() {
            debug!("Deleted {}", address);
        }
    }

    /// Refreshes probe data, keeping the registry-owned fields of an
    /// existing record
    fn on_update(&self, mut server: Server) {
        let mut servers = self.servers_mut();
        if let Some(existing) = servers.get(server.address()) {
            server.description = existing.description.clone();
            server.banner = existing.banner.clone();
        }
        server.active = true;
        servers.insert(server.core.address.clone(), server);
    }
}
