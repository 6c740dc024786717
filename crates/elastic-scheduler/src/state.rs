//! On-disk state for a single scheduler instance.
//!
//! `repository.json` holds strategies, associations, snapshots, policies,
//! templates, orders and history. `devices.json` holds the candidate device
//! inventory the selector searches. Both are written by other tooling, so
//! every pass re-reads them first and afterwards writes back only the orders
//! and history rows it added, on top of whatever is on disk by then.

use std::path::Path;

use elastic_persist::JsonStore;
use elastic_scaling::{CandidateDevice, InMemoryDeviceSearch, InMemoryRepository, RepositoryState};
use tracing::{debug, info};

use crate::error::Result;

/// Store name of the repository snapshot.
pub const REPOSITORY_STORE: &str = "repository";

/// Store name of the device inventory.
pub const DEVICES_STORE: &str = "devices";

/// Highest order and history ids seen when a pass started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Watermark {
    /// Highest order id.
    pub order_id: u64,
    /// Highest history row id.
    pub history_id: u64,
}

impl Watermark {
    fn of(state: &RepositoryState) -> Self {
        let (order_id, history_id) = state.high_water_marks();
        Self { order_id, history_id }
    }
}

/// JSON snapshot files under the state directory.
#[derive(Debug, Clone)]
pub struct StateFiles {
    repository: JsonStore,
    devices: JsonStore,
}

impl StateFiles {
    /// State files under `state_dir`.
    pub fn new(state_dir: &Path) -> Self {
        Self {
            repository: JsonStore::new(state_dir, REPOSITORY_STORE),
            devices: JsonStore::new(state_dir, DEVICES_STORE),
        }
    }

    /// Loads the repository, empty if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load_repository(&self) -> Result<InMemoryRepository> {
        let repository = InMemoryRepository::new();
        repository.replace_state(self.load_state()?);
        Ok(repository)
    }

    fn load_state(&self) -> Result<RepositoryState> {
        let state: RepositoryState = self.repository.try_load()?.unwrap_or_default();
        debug!(
            strategies = state.strategies.len(),
            snapshots = state.snapshots.len(),
            orders = state.orders.len(),
            "repository loaded"
        );
        Ok(state)
    }

    /// Re-reads both files into the live collaborators.
    ///
    /// # Errors
    ///
    /// Returns an error if the repository file exists but cannot be read or
    /// parsed; the live state is left untouched in that case.
    pub fn refresh(&self, repository: &InMemoryRepository, devices: &InMemoryDeviceSearch) -> Result<Watermark> {
        let state = self.load_state()?;
        let watermark = Watermark::of(&state);
        repository.replace_state(state);

        let inventory: Vec<CandidateDevice> = self.devices.load();
        debug!(devices = inventory.len(), "device inventory loaded");
        devices.replace_devices(inventory);
        Ok(watermark)
    }

    /// Writes the orders and history rows created since `since` on top of
    /// the current file contents, then adopts the merged state.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read back or written.
    pub fn persist_pass(&self, repository: &InMemoryRepository, since: Watermark) -> Result<usize> {
        let mut on_disk = self.load_state()?;
        let added = on_disk.append_newer(&repository.state(), since.order_id, since.history_id);
        self.repository.save(&on_disk)?;
        repository.replace_state(on_disk);
        debug!(added, "pass records persisted");
        Ok(added)
    }

    /// Loads the device inventory, empty if absent or unreadable.
    pub fn load_devices(&self) -> InMemoryDeviceSearch {
        let devices: Vec<CandidateDevice> = self.devices.load();
        info!(devices = devices.len(), "device inventory loaded");
        InMemoryDeviceSearch::with_devices(devices)
    }

    /// Writes the repository.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_repository(&self, repository: &InMemoryRepository) -> Result<()> {
        self.repository.save(&repository.state())?;
        Ok(())
    }

    /// Writes the device inventory.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save_devices(&self, devices: &[CandidateDevice]) -> Result<()> {
        self.devices.save(&devices)?;
        Ok(())
    }
}
