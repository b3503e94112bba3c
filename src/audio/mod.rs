//! Audio subsystem module

pub mod buffer;
pub mod device;
pub mod gate;
pub mod output;
pub mod recorder;
pub mod scheduler;
pub mod tone;

pub use buffer::{ChunkQueue, ScheduledChunk};
pub use device::{list_output_devices, OutputDeviceInfo};
pub use gate::ResumeGate;
pub use output::{AudioOutput, CpalBackend, CpalOutput, OutputBackend};
pub use recorder::{Recorder, Recording, RecordingOutput};
pub use scheduler::{PlaybackScheduler, PlaybackStats};
pub use tone::ToneShaper;
