use anyhow::Result;

use crate::core::{
    client::TelescopeClient,
    logs::LogChannel,
    types::{Equinox, J2000Position},
};

/// Angle covered per communication tick while slewing, in radians
pub const SLEW_STEP: f64 = 0.05;

fn angle_between(a: J2000Position, b: J2000Position) -> f64 {
    let dot = (a.x * b.x + a.y * b.y + a.z * b.z).clamp(-1.0, 1.0);
    dot.acos()
}

/// A mount that always answers and moves toward its goto target at a fixed
/// rate
pub struct SimulatorClient {
    name: String,
    equinox: Equinox,
    connected: bool,
    position: J2000Position,
    target: Option<J2000Position>,
    circles: Vec<f64>,
}

impl SimulatorClient {
    pub fn new(name: impl Into<String>, equinox: Equinox) -> Self {
        Self {
            name: name.into(),
            equinox,
            connected: true,
            position: J2000Position::new(1.0, 0.0, 0.0),
            target: None,
            circles: Vec::new(),
        }
    }

    pub fn equinox(&self) -> Equinox {
        self.equinox
    }

    pub fn is_slewing(&self) -> bool {
        self.target.is_some()
    }
}

impl TelescopeClient for SimulatorClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn has_known_position(&self) -> bool {
        self.connected
    }

    fn position(&self) -> Option<J2000Position> {
        self.connected.then_some(self.position)
    }

    fn prepare_communication(&mut self, _log: &mut LogChannel) -> bool {
        self.connected
    }

    fn perform_communication(&mut self, log: &mut LogChannel) -> Result<()> {
        let Some(target) = self.target else {
            return Ok(());
        };
        let remaining = angle_between(self.position, target);
        if remaining <= SLEW_STEP {
            self.position = target;
            self.target = None;
            log.line(format_args!("{}: target reached", self.name));
            return Ok(());
        }

        let t = SLEW_STEP / remaining;
        let p = self.position;
        self.position = J2000Position::new(
            p.x + (target.x - p.x) * t,
            p.y + (target.y - p.y) * t,
            p.z + (target.z - p.z) * t,
        )
        .normalized();
        Ok(())
    }

    fn goto_position(&mut self, target: J2000Position) {
        self.target = Some(target.normalized());
    }

    fn add_fov_circle(&mut self, radius_degrees: f64) {
        self.circles.push(radius_degrees);
    }

    fn fov_circles(&self) -> &[f64] {
        &self.circles
    }

    fn disconnect(&mut self) {
        self.connected = false;
        self.target = None;
    }
}
