#![allow(dead_code)]

use anyhow::{bail, Result};
use parking_lot::Mutex;
use std::{path::Path, sync::Arc};

use scopeslot::core::{
    client::{ClientFactory, ClientInit, ObjectSelection, TelescopeClient},
    logs::LogChannel,
    types::{J2000Position, SlotNumber},
};

/// Records every init string it is asked to build
#[derive(Clone, Default)]
pub struct RecordingFactory {
    pub calls: Arc<Mutex<Vec<String>>>,
    pub fail: Arc<Mutex<bool>>,
    /// Every circle attached to any client this factory built
    pub circles: Arc<Mutex<Vec<f64>>>,
}

impl RecordingFactory {
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

impl ClientFactory for RecordingFactory {
    fn create(&mut self, init: &ClientInit) -> Result<Box<dyn TelescopeClient>> {
        self.calls.lock().push(init.to_string());
        if *self.fail.lock() {
            bail!("refusing to build {}", init.name());
        }
        Ok(Box::new(FakeClient {
            name: init.name().to_string(),
            connected: true,
            circles: Vec::new(),
            attached: self.circles.clone(),
        }))
    }
}

pub struct FakeClient {
    name: String,
    connected: bool,
    circles: Vec<f64>,
    attached: Arc<Mutex<Vec<f64>>>,
}

impl TelescopeClient for FakeClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn has_known_position(&self) -> bool {
        false
    }

    fn prepare_communication(&mut self, _log: &mut LogChannel) -> bool {
        self.connected
    }

    fn perform_communication(&mut self, _log: &mut LogChannel) -> Result<()> {
        Ok(())
    }

    fn goto_position(&mut self, _target: J2000Position) {}

    fn add_fov_circle(&mut self, radius_degrees: f64) {
        self.circles.push(radius_degrees);
        self.attached.lock().push(radius_degrees);
    }

    fn fov_circles(&self) -> &[f64] {
        &self.circles
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }
}

/// Pretends one slot's connection holds the selected object
#[derive(Clone, Default)]
pub struct FakeSelection {
    pub selected: Arc<Mutex<Option<SlotNumber>>>,
    pub deselect_calls: Arc<Mutex<usize>>,
}

impl ObjectSelection for FakeSelection {
    fn selected_connection_for_slot(&self, slot: SlotNumber) -> bool {
        *self.selected.lock() == Some(slot)
    }

    fn deselect(&mut self) {
        *self.selected.lock() = None;
        *self.deselect_calls.lock() += 1;
    }
}

pub fn slot(n: i64) -> SlotNumber {
    SlotNumber::new(n).unwrap()
}

#[cfg(unix)]
pub fn install_server(dir: &Path, name: &str, script: &str) {
    use std::os::unix::fs::PermissionsExt;
    let path = dir.join(name);
    std::fs::write(&path, script).unwrap();
    std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
}
