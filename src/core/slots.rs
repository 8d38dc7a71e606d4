/// Slot registry and lifecycle
///
/// The registry owns the live connection of every started slot. A slot
/// that is in the middle of starting or stopping is marked in the registry
/// too, so a second start of the same slot is refused until the first one
/// has finished or rolled back.
use derive_more::Display;
use std::collections::BTreeMap;

use super::{client::TelescopeClient, types::SlotNumber, validation::RejectReason};

/// Why a slot operation failed
#[derive(Debug, Clone, PartialEq, Display)]
pub enum SlotError {
    #[display("{reason}")]
    Rejected { reason: RejectReason },
    #[display("no telescope is configured at slot {slot}")]
    NotConfigured { slot: SlotNumber },
    #[display("slot {slot} is {state}")]
    Busy { slot: SlotNumber, state: SlotState },
    #[display("no connection at slot {slot}")]
    NotConnected { slot: SlotNumber },
    #[display("unknown device model '{model}' at slot {slot}")]
    UnknownDeviceModel { slot: SlotNumber, model: String },
    #[display("telescope server for slot {slot} failed to start: {message}")]
    ServerStart { slot: SlotNumber, message: String },
    #[display("telescope server for slot {slot} failed to stop: {message}")]
    ServerStop { slot: SlotNumber, message: String },
    #[display("connection for slot {slot} could not be created: {message}")]
    Connection { slot: SlotNumber, message: String },
    #[display("invalid telescope server directory '{path}': {message}")]
    ServerDirectory { path: String, message: String },
}

impl std::error::Error for SlotError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SlotError::Rejected { reason } => Some(reason),
            _ => None,
        }
    }
}

impl From<RejectReason> for SlotError {
    fn from(reason: RejectReason) -> Self {
        SlotError::Rejected { reason }
    }
}

/// Anything a caller may pass as a slot number.
///
/// Raw integers are range checked here, so an out-of-range value fails
/// before any registry is touched.
pub trait AsSlot {
    fn as_slot(&self) -> Result<SlotNumber, SlotError>;
}

impl AsSlot for SlotNumber {
    fn as_slot(&self) -> Result<SlotNumber, SlotError> {
        Ok(*self)
    }
}

macro_rules! impl_as_slot {
    ($($ty:ty),*) => {
        $(
            impl AsSlot for $ty {
                fn as_slot(&self) -> Result<SlotNumber, SlotError> {
                    let value = i64::try_from(*self).unwrap_or(i64::MAX);
                    Ok(SlotNumber::new(value)?)
                }
            }
        )*
    };
}

impl_as_slot!(i32, i64, u8, u32, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SlotState {
    #[display("unconfigured")]
    Unconfigured,
    #[display("configured")]
    Configured,
    #[display("starting")]
    Starting,
    #[display("connected")]
    Connected,
    #[display("stopping")]
    Stopping,
}

/// Live connections and in-flight transitions, keyed by slot
#[derive(Default)]
pub struct SlotRegistry {
    clients: BTreeMap<SlotNumber, Box<dyn TelescopeClient>>,
    transitions: BTreeMap<SlotNumber, SlotState>,
}

impl SlotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `slot` as starting. Fails if it is connected or already busy.
    pub fn begin_start(&mut self, slot: SlotNumber) -> Result<(), SlotError> {
        if let Some(state) = self.live_state(slot) {
            return Err(SlotError::Busy { slot, state });
        }
        self.transitions.insert(slot, SlotState::Starting);
        Ok(())
    }

    /// Register the new connection and leave the starting state.
    pub fn finish_start(&mut self, slot: SlotNumber, client: Box<dyn TelescopeClient>) {
        self.transitions.remove(&slot);
        self.clients.insert(slot, client);
    }

    /// Leave the starting state without a connection.
    pub fn abort_start(&mut self, slot: SlotNumber) {
        self.transitions.remove(&slot);
    }

    /// Mark `slot` as stopping and hand back its connection, if any.
    pub fn begin_stop(&mut self, slot: SlotNumber) -> Option<Box<dyn TelescopeClient>> {
        let client = self.clients.remove(&slot);
        if client.is_some() {
            self.transitions.insert(slot, SlotState::Stopping);
        }
        client
    }

    pub fn finish_stop(&mut self, slot: SlotNumber) {
        self.transitions.remove(&slot);
    }

    /// Starting, Connected or Stopping; `None` for idle slots.
    pub fn live_state(&self, slot: SlotNumber) -> Option<SlotState> {
        self.transitions.get(&slot).copied().or_else(|| {
            self.clients
                .contains_key(&slot)
                .then_some(SlotState::Connected)
        })
    }

    pub fn contains(&self, slot: SlotNumber) -> bool {
        self.clients.contains_key(&slot)
    }

    pub fn get(&self, slot: SlotNumber) -> Option<&dyn TelescopeClient> {
        self.clients.get(&slot).map(|client| client.as_ref())
    }

    pub fn get_mut(&mut self, slot: SlotNumber) -> Option<&mut Box<dyn TelescopeClient>> {
        self.clients.get_mut(&slot)
    }

    /// Slots with a connection, ascending
    pub fn slots(&self) -> Vec<SlotNumber> {
        self.clients.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotNumber, &dyn TelescopeClient)> {
        self.clients
            .iter()
            .map(|(slot, client)| (*slot, client.as_ref()))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (SlotNumber, &mut Box<dyn TelescopeClient>)> {
        self.clients.iter_mut().map(|(slot, client)| (*slot, client))
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Equinox;
    use crate::protocol::telescope::SimulatorClient;

    fn slot(n: i64) -> SlotNumber {
        SlotNumber::new(n).unwrap()
    }

    #[test]
    fn raw_numbers_are_range_checked() {
        assert_eq!(5i32.as_slot().unwrap(), slot(5));
        assert_eq!(9usize.as_slot().unwrap(), slot(9));
        assert!(matches!(
            0u8.as_slot(),
            Err(SlotError::Rejected {
                reason: RejectReason::SlotOutOfRange { value: 0 }
            })
        ));
        assert!((-1i64).as_slot().is_err());
        assert!(usize::MAX.as_slot().is_err());
    }

    #[test]
    fn start_is_exclusive() {
        let mut registry = SlotRegistry::new();
        registry.begin_start(slot(1)).unwrap();
        assert_eq!(registry.live_state(slot(1)), Some(SlotState::Starting));
        assert!(matches!(
            registry.begin_start(slot(1)),
            Err(SlotError::Busy {
                state: SlotState::Starting,
                ..
            })
        ));

        registry.finish_start(slot(1), Box::new(SimulatorClient::new("Sim", Equinox::J2000)));
        assert_eq!(registry.live_state(slot(1)), Some(SlotState::Connected));
        assert!(registry.begin_start(slot(1)).is_err());
    }

    #[test]
    fn aborted_start_leaves_nothing() {
        let mut registry = SlotRegistry::new();
        registry.begin_start(slot(2)).unwrap();
        registry.abort_start(slot(2));
        assert_eq!(registry.live_state(slot(2)), None);
        assert!(registry.is_empty());
    }

    #[test]
    fn stop_hands_back_connection() {
        let mut registry = SlotRegistry::new();
        registry.begin_start(slot(3)).unwrap();
        registry.finish_start(slot(3), Box::new(SimulatorClient::new("Sim", Equinox::J2000)));

        let client = registry.begin_stop(slot(3)).unwrap();
        assert_eq!(client.name(), "Sim");
        assert_eq!(registry.live_state(slot(3)), Some(SlotState::Stopping));
        registry.finish_stop(slot(3));
        assert_eq!(registry.live_state(slot(3)), None);

        assert!(registry.begin_stop(slot(3)).is_none());
        assert_eq!(registry.live_state(slot(3)), None);
    }
}
