//! Control channel
//!
//! Outgoing commands ride the audio socket. Stateful commands (mute,
//! squelch, AGC, demodulation, window) are only transmitted when they differ
//! from the last value the server actually received.

use tracing::{debug, trace};

use crate::network::transport::TransportHandle;
use crate::protocol::command::{AgcSetting, ControlCommand};
use crate::protocol::mode::Demodulation;
use crate::protocol::settings::AudioWindow;

/// Where serialized commands go
pub trait CommandSink {
    /// Returns false if the text could not be sent
    fn send_text(&mut self, text: String) -> bool;
}

impl CommandSink for TransportHandle {
    fn send_text(&mut self, text: String) -> bool {
        TransportHandle::send_text(self, text)
    }
}

/// Last successfully sent value per stateful command
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlIntentTracker {
    pub mute: Option<bool>,
    pub squelch: Option<bool>,
    pub agc: Option<AgcSetting>,
    pub demodulation: Option<Demodulation>,
    pub window: Option<AudioWindow>,
}

impl ControlIntentTracker {
    fn matches(&self, cmd: &ControlCommand) -> bool {
        match cmd {
            ControlCommand::Mute { mute } => self.mute == Some(*mute),
            ControlCommand::Squelch { enabled } => self.squelch == Some(*enabled),
            ControlCommand::Agc(agc) => self.agc == Some(*agc),
            ControlCommand::Demodulation { demodulation } => {
                self.demodulation == Some(*demodulation)
            }
            ControlCommand::Window { l, m, r } => {
                self.window == Some(AudioWindow::new(*l, *m, *r))
            }
            ControlCommand::Receiver { .. }
            | ControlCommand::Options { .. }
            | ControlCommand::UserId { .. } => false,
        }
    }

    fn record(&mut self, cmd: &ControlCommand) {
        match cmd {
            ControlCommand::Mute { mute } => self.mute = Some(*mute),
            ControlCommand::Squelch { enabled } => self.squelch = Some(*enabled),
            ControlCommand::Agc(agc) => self.agc = Some(*agc),
            ControlCommand::Demodulation { demodulation } => {
                self.demodulation = Some(*demodulation)
            }
            ControlCommand::Window { l, m, r } => self.window = Some(AudioWindow::new(*l, *m, *r)),
            ControlCommand::Receiver { .. }
            | ControlCommand::Options { .. }
            | ControlCommand::UserId { .. } => {}
        }
    }
}

pub struct ControlChannel {
    sink: Box<dyn CommandSink>,
    tracker: ControlIntentTracker,
    sent: u64,
    failed: u64,
}

impl ControlChannel {
    pub fn new(sink: Box<dyn CommandSink>) -> Self {
        Self {
            sink,
            tracker: ControlIntentTracker::default(),
            sent: 0,
            failed: 0,
        }
    }

    /// Send a command unless the server already has it.
    /// Returns true if it was transmitted.
    pub fn send(&mut self, cmd: ControlCommand) -> bool {
        if self.tracker.matches(&cmd) {
            trace!("Skipping unchanged {:?}", cmd);
            return false;
        }
        if !self.sink.send_text(cmd.to_json()) {
            self.failed += 1;
            debug!("Control command not sent: {:?}", cmd);
            return false;
        }
        self.sent += 1;
        self.tracker.record(&cmd);
        true
    }

    pub fn set_mute(&mut self, mute: bool) -> bool {
        self.send(ControlCommand::Mute { mute })
    }

    pub fn set_squelch(&mut self, enabled: bool) -> bool {
        self.send(ControlCommand::Squelch { enabled })
    }

    pub fn set_agc(&mut self, agc: AgcSetting) -> bool {
        self.send(ControlCommand::Agc(agc))
    }

    pub fn set_demodulation(&mut self, demodulation: Demodulation) -> bool {
        self.send(ControlCommand::Demodulation { demodulation })
    }

    pub fn set_window(&mut self, window: AudioWindow) -> bool {
        self.send(ControlCommand::window(window))
    }

    pub fn select_receiver(&mut self, receiver_id: &str) -> bool {
        self.send(ControlCommand::Receiver {
            receiver_id: receiver_id.to_string(),
        })
    }

    /// Forget everything sent so the next sync retransmits it all
    pub fn force_resync(&mut self) {
        self.tracker = ControlIntentTracker::default();
    }

    pub fn tracker(&self) -> &ControlIntentTracker {
        &self.tracker
    }

    /// `(sent, failed)`
    pub fn counts(&self) -> (u64, u64) {
        (self.sent, self.failed)
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::CommandSink;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records sent text; refuses while `open` is false
    #[derive(Clone, Default)]
    pub struct RecordingSink {
        pub log: Rc<RefCell<Vec<String>>>,
        pub closed: Rc<RefCell<bool>>,
    }

    impl RecordingSink {
        pub fn take(&self) -> Vec<serde_json::Value> {
            self.log
                .borrow_mut()
                .drain(..)
                .map(|t| serde_json::from_str(&t).unwrap())
                .collect()
        }

        pub fn set_closed(&self, closed: bool) {
            *self.closed.borrow_mut() = closed;
        }
    }

    impl CommandSink for RecordingSink {
        fn send_text(&mut self, text: String) -> bool {
            if *self.closed.borrow() {
                return false;
            }
            self.log.borrow_mut().push(text);
            true
        }
    }
}
