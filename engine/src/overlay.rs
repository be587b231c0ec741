//! Per-layer setting overrides.
//!
//! Print jobs may carry a CSV sheet that overrides named settings for
//! individual layers. The first row names the overridden settings (the
//! first column is the layer number); each following row gives one layer's
//! overrides, with empty cells meaning "no override". Rows are terminated
//! by `\r` so sheets written with bare-CR line endings load too.
//!
//! Loading fails closed: a duplicate column name or duplicate layer number
//! rejects the whole sheet, leaving the overlay empty, because a sheet that
//! disagrees with itself cannot be trusted for any layer.

use crate::settings::Settings;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum OverlayError {
    #[error("duplicate column {0:?} in layer settings")]
    DuplicateColumn(String),
    #[error("duplicate row for layer {0} in layer settings")]
    DuplicateLayer(i32),
    #[error("layer settings sheet has no header row")]
    MissingHeader,
    #[error("layer settings sheet has no layer rows")]
    NoRows,
}

/// The parsed override sheet.
#[derive(Debug, Default)]
pub struct Overlay {
    /// Column index per setting name.
    columns: HashMap<String, usize>,
    /// Override values per layer; `NaN` marks an empty cell.
    rows: HashMap<i32, Vec<f64>>,
}

fn trim(cell: &str) -> &str {
    cell.trim_matches(|c: char| c == ' ' || c == '\t' || c == '\n' || c == '\r')
}

impl Overlay {
    /// Parses a sheet. Any error yields an empty overlay to the caller via
    /// `unwrap_or_default`; the error itself says what was wrong.
    pub fn load(sheet: &str) -> Result<Overlay, OverlayError> {
        let mut overlay = Overlay::default();

        // Bare-CR sheets are the norm here; treat LF as cell whitespace.
        let mut lines = sheet.split('\r');

        let header = lines.next().ok_or(OverlayError::MissingHeader)?;
        if trim(header).is_empty() {
            return Err(OverlayError::MissingHeader);
        }

        // Skip the layer-number column heading itself.
        for (index, cell) in header.split(',').skip(1).enumerate() {
            let name = trim(cell).to_string();
            if overlay.columns.insert(name.clone(), index).is_some() {
                return Err(OverlayError::DuplicateColumn(name));
            }
        }

        for line in lines {
            let mut cells = line.split(',');

            let layer = match cells.next().map(trim) {
                Some(first) if !first.is_empty() => first.parse::<i32>().unwrap_or(0),
                _ => continue,
            };
            if layer < 1 {
                // Comment or other non-layer row.
                continue;
            }

            let row: Vec<f64> = cells
                .map(|cell| {
                    let text = trim(cell);
                    if text.is_empty() {
                        f64::NAN
                    } else {
                        text.parse().unwrap_or(f64::NAN)
                    }
                })
                .collect();

            if overlay.rows.insert(layer, row).is_some() {
                return Err(OverlayError::DuplicateLayer(layer));
            }
        }

        if overlay.rows.is_empty() {
            return Err(OverlayError::NoRows);
        }
        Ok(overlay)
    }

    /// The raw override for a layer and setting name, `None` when the
    /// sheet has nothing to say.
    pub fn raw_value(&self, layer: i32, name: &str) -> Option<f64> {
        let column = *self.columns.get(name)?;
        let value = *self.rows.get(&layer)?.get(column)?;
        if value.is_nan() {
            None
        } else {
            Some(value)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Base settings plus overlay, resolved per layer.
#[derive(Debug, Default)]
pub struct LayerParams {
    pub base: Settings,
    pub overlay: Overlay,
}

impl LayerParams {
    pub fn new(base: Settings, overlay: Overlay) -> Self {
        LayerParams { base, overlay }
    }

    /// The effective integer value of a setting for one layer.
    pub fn get_int(&self, layer: i32, name: &str) -> i32 {
        match self.overlay.raw_value(layer, name) {
            Some(value) => value as i32,
            None => self.base.get_int(name),
        }
    }

    /// The effective floating-point value of a setting for one layer.
    pub fn get_double(&self, layer: i32, name: &str) -> f64 {
        self.overlay
            .raw_value(layer, name)
            .unwrap_or_else(|| self.base.get_double(name))
    }
}
