//! Wire protocol between the client and the WebSDR server

pub mod command;
pub mod frame;
pub mod mode;
pub mod settings;

pub use command::{AgcSetting, ControlCommand};
pub use frame::{parse as parse_frame, WireFrame};
pub use mode::{AgcSpeed, BufferMode, Demodulation, ReceiverMode};
pub use settings::{AudioWindow, SessionSettings};
