use flume::{Receiver, Sender};

use super::{
    slots::SlotError,
    types::{J2000Position, SlotNumber},
};

/// Requests from a front end to the tick loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotCommand {
    Start(SlotNumber),
    Stop(SlotNumber),
    Goto {
        slot: SlotNumber,
        target: J2000Position,
    },
    StopAll,
    /// Stop every slot and leave the loop.
    Quit,
}

/// Notifications from the tick loop back to the front end.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotEvent {
    Started(SlotNumber),
    Stopped(SlotNumber),
    /// A live connection went up or down on its own.
    ConnectionChanged { slot: SlotNumber, connected: bool },
    CommandFailed(SlotError),
    /// Sent once after the loop has stopped every slot.
    Quit,
}

/// Front-end side of the loop's channels
#[derive(Debug, Clone)]
pub struct Bus {
    pub event_rx: Receiver<SlotEvent>,
    pub command_tx: Sender<SlotCommand>,
}

impl Bus {
    pub fn new(event_rx: Receiver<SlotEvent>, command_tx: Sender<SlotCommand>) -> Self {
        Self {
            event_rx,
            command_tx,
        }
    }
}

/// Create both channel pairs: the front end keeps the [`Bus`], the loop
/// gets the command receiver and the event sender.
pub fn channels() -> (Bus, Receiver<SlotCommand>, Sender<SlotEvent>) {
    let (command_tx, command_rx) = flume::unbounded();
    let (event_tx, event_rx) = flume::unbounded();
    (Bus::new(event_rx, command_tx), command_rx, event_tx)
}
