/// Slot manager
///
/// Owns every per-slot resource: the descriptor store, the device model
/// catalog, helper processes, log channels and live connections. All
/// operations run on the caller's thread.
use anyhow::Result;
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
};

use super::{
    client::{create_connection, ClientFactory, NoSelection, ObjectSelection},
    device_models::{scan_server_executables, DeviceModel, DeviceModelCatalog},
    logs::LogChannelRegistry,
    persistence::{DescriptorStore, LoadReport},
    pump::{communicate, PumpReport},
    settings::Settings,
    slots::{AsSlot, SlotError, SlotRegistry, SlotState},
    subprocess::ServerProcessSupervisor,
    types::{ConnectionDescriptor, ConnectionKind, J2000Position, SlotNumber},
    validation::validate_descriptor,
};
use crate::protocol::telescope::BuiltinClientFactory;

pub struct SlotManager {
    data_dir: PathBuf,
    settings: Settings,
    store: DescriptorStore,
    catalog: DeviceModelCatalog,
    supervisor: ServerProcessSupervisor,
    logs: LogChannelRegistry,
    registry: SlotRegistry,
    factory: Box<dyn ClientFactory>,
    selection: Box<dyn ObjectSelection>,
}

impl SlotManager {
    /// Build a manager rooted at `data_dir` and load its device models.
    ///
    /// Descriptors are not read until [`SlotManager::load`] or
    /// [`SlotManager::load_and_autostart`].
    pub fn new(data_dir: impl Into<PathBuf>, settings: Settings) -> Self {
        let data_dir = data_dir.into();
        let server_dir = settings.server_dir(&data_dir);
        let mut manager = Self {
            store: DescriptorStore::new(&data_dir),
            catalog: DeviceModelCatalog::new(&data_dir),
            supervisor: ServerProcessSupervisor::new(
                Some(server_dir),
                &data_dir,
                settings.use_server_logs,
            ),
            logs: LogChannelRegistry::new(&data_dir, settings.use_server_logs),
            registry: SlotRegistry::new(),
            factory: Box::new(BuiltinClientFactory),
            selection: Box::new(NoSelection),
            data_dir,
            settings,
        };
        manager.reload_device_models();
        manager
    }

    pub fn with_factory(mut self, factory: Box<dyn ClientFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_selection(mut self, selection: Box<dyn ObjectSelection>) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_supervisor(mut self, supervisor: ServerProcessSupervisor) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn catalog(&self) -> &DeviceModelCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &DescriptorStore {
        &self.store
    }

    pub fn supervisor(&self) -> &ServerProcessSupervisor {
        &self.supervisor
    }

    pub fn logs(&self) -> &LogChannelRegistry {
        &self.logs
    }

    pub fn reload_device_models(&mut self) {
        let server_dir = self.settings.server_dir(&self.data_dir);
        self.supervisor.set_server_dir(Some(server_dir.clone()));
        self.catalog
            .load(self.settings.use_server_executables, Some(&server_dir));
    }

    /// Stop every slot, then replace the in-memory descriptors with
    /// `telescopes.json`.
    pub fn load(&mut self) -> LoadReport {
        if !self.delete_all_telescopes() {
            log::warn!("Not every slot stopped cleanly before reloading telescopes");
        }
        self.store.load()
    }

    pub fn save(&self) -> Result<()> {
        self.store.save()
    }

    /// Load descriptors and start every slot marked `connect_at_startup`.
    pub fn load_and_autostart(&mut self) -> LoadReport {
        let report = self.load();
        for (slot, descriptor) in self.store.snapshot() {
            if !descriptor.connect_at_startup {
                continue;
            }
            if let Err(err) = self.start_slot(slot) {
                log::warn!("Autostart of slot {slot} failed: {err}");
            }
        }
        report
    }

    pub fn add(
        &mut self,
        slot: impl AsSlot,
        descriptor: ConnectionDescriptor,
    ) -> Result<(), SlotError> {
        let slot = slot.as_slot()?;
        self.store.add(slot, descriptor)?;
        Ok(())
    }

    pub fn get(&self, slot: impl AsSlot) -> Result<ConnectionDescriptor, SlotError> {
        let slot = slot.as_slot()?;
        self.store.get(slot).ok_or(SlotError::NotConfigured { slot })
    }

    /// Forget the descriptor of `slot`. A running connection is left alone.
    pub fn remove(&mut self, slot: impl AsSlot) -> Result<(), SlotError> {
        let slot = slot.as_slot()?;
        if self.store.remove(slot) {
            Ok(())
        } else {
            Err(SlotError::NotConfigured { slot })
        }
    }

    pub fn configured_slots(&self) -> Vec<SlotNumber> {
        self.store.slots()
    }

    /// Slots with a connection, ascending
    pub fn live_slots(&self) -> Vec<SlotNumber> {
        self.registry.slots()
    }

    fn device_model_for(
        &self,
        slot: SlotNumber,
        descriptor: &ConnectionDescriptor,
    ) -> Result<Option<DeviceModel>, SlotError> {
        if descriptor.connection_kind != ConnectionKind::Internal {
            return Ok(None);
        }
        let model = descriptor.device_model_name.clone().unwrap_or_default();
        self.catalog
            .get(&model)
            .cloned()
            .map(Some)
            .ok_or(SlotError::UnknownDeviceModel { slot, model })
    }

    /// Bring up the connection of a configured slot.
    ///
    /// A model driven by a helper executable gets its process spawned before
    /// the connection is built. If the connection cannot be built the process
    /// is stopped again, so either both exist or neither does.
    pub fn start_slot(&mut self, slot: impl AsSlot) -> Result<(), SlotError> {
        let slot = slot.as_slot()?;
        let descriptor = self
            .store
            .get(slot)
            .ok_or(SlotError::NotConfigured { slot })?;
        let descriptor = validate_descriptor(descriptor)?;
        let model = self.device_model_for(slot, &descriptor)?;
        let uses_executable = model.as_ref().is_some_and(|model| model.use_executable);

        self.registry.begin_start(slot)?;

        if let Some(model) = model.as_ref().filter(|model| model.use_executable) {
            let started = self.supervisor.start(
                slot,
                &model.name,
                descriptor.tcp_port.unwrap_or_else(|| slot.default_tcp_port()),
                descriptor.serial_port.as_deref().unwrap_or_default(),
                &self.catalog,
            );
            if let Err(err) = started {
                self.registry.abort_start(slot);
                log::error!("Telescope server for slot {slot} failed to start: {err:#}");
                return Err(SlotError::ServerStart {
                    slot,
                    message: format!("{err:#}"),
                });
            }
            // The helper writes the slot's log file itself.
            self.logs.open_discarding(slot);
        } else {
            self.logs.open(slot);
        }

        match create_connection(self.factory.as_mut(), slot, &descriptor, model.as_ref()) {
            Ok(client) => {
                log::info!(
                    "Slot {slot} started: {} ({})",
                    descriptor.name,
                    descriptor.connection_kind
                );
                self.registry.finish_start(slot, client);
                Ok(())
            }
            Err(err) => {
                if uses_executable {
                    if let Err(stop_err) = self.supervisor.stop(slot) {
                        log::warn!("{stop_err:#}");
                    }
                }
                self.logs.remove(slot);
                self.registry.abort_start(slot);
                log::error!("Connection for slot {slot} could not be created: {err:#}");
                Err(SlotError::Connection {
                    slot,
                    message: format!("{err:#}"),
                })
            }
        }
    }

    /// Tear down the connection of `slot`. Stopping an idle slot succeeds.
    ///
    /// The connection and log channel are dropped even when the helper
    /// process does not exit cleanly; that failure is still reported.
    pub fn stop_slot(&mut self, slot: impl AsSlot) -> Result<(), SlotError> {
        let slot = slot.as_slot()?;
        if self.registry.contains(slot) && self.selection.selected_connection_for_slot(slot) {
            self.selection.deselect();
        }

        let client = self.registry.begin_stop(slot);
        let stopped = self.supervisor.stop(slot);
        if let Some(mut client) = client {
            client.disconnect();
            log::info!("Slot {slot} stopped: {}", client.name());
        }
        self.logs.remove(slot);
        self.registry.finish_stop(slot);

        stopped.map_err(|err| SlotError::ServerStop {
            slot,
            message: format!("{err:#}"),
        })
    }

    /// Stop every live slot. Returns `true` if all of them stopped cleanly.
    pub fn stop_all(&mut self) -> bool {
        let mut slots = self.registry.slots();
        slots.extend(self.supervisor.slots());
        slots.sort();
        slots.dedup();

        slots.into_iter().fold(true, |all_ok, slot| {
            let stopped = self.stop_slot(slot);
            if let Err(err) = &stopped {
                log::warn!("{err}");
            }
            stopped.is_ok() && all_ok
        })
    }

    /// Alias used on shutdown and before reconfiguration.
    pub fn delete_all_telescopes(&mut self) -> bool {
        self.stop_all()
    }

    pub fn slot_state(&self, slot: impl AsSlot) -> Result<SlotState, SlotError> {
        let slot = slot.as_slot()?;
        Ok(match self.registry.live_state(slot) {
            Some(state) => state,
            None if self.store.contains(slot) => SlotState::Configured,
            None => SlotState::Unconfigured,
        })
    }

    pub fn is_existing_client_at_slot(&self, slot: impl AsSlot) -> bool {
        slot.as_slot()
            .is_ok_and(|slot| self.registry.contains(slot))
    }

    pub fn is_connected_client_at_slot(&self, slot: impl AsSlot) -> bool {
        slot.as_slot()
            .ok()
            .and_then(|slot| self.registry.get(slot))
            .is_some_and(|client| client.is_connected())
    }

    pub fn connected_client_names(&self) -> BTreeMap<SlotNumber, String> {
        self.registry
            .iter()
            .filter(|(_, client)| client.is_connected())
            .map(|(slot, client)| (slot, client.name().to_string()))
            .collect()
    }

    pub fn position(&self, slot: impl AsSlot) -> Result<Option<J2000Position>, SlotError> {
        let slot = slot.as_slot()?;
        let client = self
            .registry
            .get(slot)
            .ok_or(SlotError::NotConnected { slot })?;
        Ok(client.position())
    }

    pub fn goto_position(
        &mut self,
        slot: impl AsSlot,
        target: J2000Position,
    ) -> Result<(), SlotError> {
        let slot = slot.as_slot()?;
        let client = self
            .registry
            .get_mut(slot)
            .ok_or(SlotError::NotConnected { slot })?;
        client.goto_position(target.normalized());
        Ok(())
    }

    /// Slots whose helper process exited without being stopped.
    pub fn reap_dead_servers(&mut self) -> Vec<SlotNumber> {
        self.supervisor.reap_dead_processes()
    }

    /// One communication tick over every live slot.
    pub fn communicate(&mut self) -> PumpReport {
        communicate(&mut self.registry, &mut self.logs)
    }

    pub fn use_server_executables(&self) -> bool {
        self.settings.use_server_executables
    }

    /// Switch between helper executables and embedded servers.
    ///
    /// Every slot is stopped and the catalog rebuilt when the flag changes.
    pub fn set_use_server_executables(&mut self, enabled: bool) {
        if self.settings.use_server_executables == enabled {
            return;
        }
        self.stop_all();
        self.settings.use_server_executables = enabled;
        self.reload_device_models();
    }

    /// Point the manager at another helper directory.
    ///
    /// The directory must exist and contain at least one helper executable.
    pub fn set_server_executables_directory_path(
        &mut self,
        path: impl Into<PathBuf>,
    ) -> Result<(), SlotError> {
        let path = path.into();
        if !path.is_dir() {
            return Err(SlotError::ServerDirectory {
                path: path.display().to_string(),
                message: "directory does not exist".into(),
            });
        }
        if scan_server_executables(&path).is_empty() {
            return Err(SlotError::ServerDirectory {
                path: path.display().to_string(),
                message: "no telescope server executables found".into(),
            });
        }
        self.settings.server_executables_path = Some(path);
        self.stop_all();
        self.reload_device_models();
        Ok(())
    }

    pub fn use_server_logs(&self) -> bool {
        self.settings.use_server_logs
    }

    /// Takes effect for slots started afterwards.
    pub fn set_use_server_logs(&mut self, enabled: bool) {
        self.settings.use_server_logs = enabled;
        self.logs.set_enabled(enabled);
        self.supervisor.set_use_logs(enabled);
    }
}

impl Drop for SlotManager {
    fn drop(&mut self) {
        self.stop_all();
    }
}
