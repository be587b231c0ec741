//! Printer status snapshots.

use crate::state::PrinterState;

/// A point-in-time description of the printer, pushed to the status sink
/// on every state change. Pure value type; receivers never share it
/// mutably with the engine.
#[derive(Clone, Debug, PartialEq)]
pub struct PrinterStatus {
    pub state: &'static str,
    pub substate: &'static str,
    pub is_error: bool,
    pub error: Option<String>,
    pub layer: i32,
    pub total_layers: i32,
    pub seconds_remaining: i32,
    pub temperature: f64,
    pub job_name: String,
}

impl PrinterStatus {
    pub fn new(state: PrinterState) -> Self {
        PrinterStatus {
            state: state.name(),
            substate: state.substate_name(),
            is_error: state == PrinterState::Error,
            error: None,
            layer: 0,
            total_layers: 0,
            seconds_remaining: 0,
            temperature: 0.0,
            job_name: String::new(),
        }
    }
}
