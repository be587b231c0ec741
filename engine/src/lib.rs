//! Print sequencing engine for the application processor.
//!
//! The motion controller executes one motor batch at a time; this crate
//! decides which batch comes next. It owns the print state machine that
//! walks each layer through press, exposure, separation and approach,
//! resolves per-layer setting overrides, composes the motor command
//! batches, and reports printer status snapshots to whoever is listening.
//!
//! Everything peripheral is reached through a narrow trait: the bus
//! transport writes command frames, the projector shows a slice or black,
//! and the status sink receives snapshots. Timers and switch edges arrive
//! as events through a single-threaded event loop, so state transitions
//! are atomic with respect to everything else.

pub mod engine;
pub mod event;
pub mod layer;
pub mod motor;
pub mod overlay;
pub mod settings;
pub mod state;
pub mod status;

pub use crate::engine::{ImageSink, PrintEngine, StatusSink};
pub use crate::event::{EventLoop, PrintEvent};
pub use crate::layer::{CurrentLayerSettings, LayerKind};
pub use crate::motor::{Motor, Transport, TransportError};
pub use crate::overlay::{LayerParams, Overlay, OverlayError};
pub use crate::settings::Settings;
pub use crate::state::PrinterState;
pub use crate::status::PrinterStatus;
