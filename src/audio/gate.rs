//! Resume intent
//!
//! A user gesture may ask for playback to resume before any output exists.
//! The gate remembers that request until an output registers.

#[derive(Debug, Default)]
pub struct ResumeGate {
    registered: bool,
    pending: bool,
}

impl ResumeGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// An output became available. Returns true if a queued resume should run now.
    pub fn register(&mut self) -> bool {
        self.registered = true;
        std::mem::take(&mut self.pending)
    }

    /// The output went away
    pub fn unregister(&mut self) {
        self.registered = false;
    }

    /// Request a resume. Returns true if it should run now, otherwise it is queued.
    pub fn trigger(&mut self) -> bool {
        if self.registered {
            true
        } else {
            self.pending = true;
            false
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }
}
