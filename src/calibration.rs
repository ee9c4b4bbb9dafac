//! Preamble-to-physical-units transform.
//!
//! Sample `i` sits at `((i - x_reference) * x_increment + x_origin)` seconds.
//! The display unit is picked from the whole acquisition span
//! (`points * x_increment`), not from a single increment.

use crate::types::{PreambleRecord, TimeUnitScale};

/// Extra headroom above the instrument's vertical range.
pub const VERTICAL_MARGIN: f64 = 1.1;

/// Axis bounds and time unit for one waveform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub x_min: f64,
    pub x_max: f64,
    pub y_half_range: f64,
    pub time_scale: TimeUnitScale,
    x_increment: f64,
    x_origin: f64,
    x_reference: f64,
}

impl Calibration {
    pub fn new(preamble: &PreambleRecord, vertical_range: f64) -> Self {
        let time_scale =
            TimeUnitScale::from_magnitude(f64::from(preamble.points) * preamble.x_increment);
        let scale = time_scale.multiplier;
        let last_index = f64::from(preamble.points) - 1.0;

        Self {
            x_min: preamble.x_origin * scale,
            x_max: ((last_index - preamble.x_reference) * preamble.x_increment
                + preamble.x_origin)
                * scale,
            y_half_range: vertical_range * VERTICAL_MARGIN / 2.0,
            time_scale,
            x_increment: preamble.x_increment,
            x_origin: preamble.x_origin,
            x_reference: preamble.x_reference,
        }
    }

    pub fn unit(&self) -> &'static str {
        self.time_scale.unit
    }

    /// Scaled time coordinate of sample `index`.
    pub fn x_at(&self, index: usize) -> f64 {
        ((index as f64 - self.x_reference) * self.x_increment + self.x_origin)
            * self.time_scale.multiplier
    }

    /// The same transform as [`Calibration::x_at`] written as a plotter
    /// expression over the row counter `$0`.
    pub fn x_expression(&self) -> String {
        format!(
            "(($0-({}))*({})+({}))*({})",
            self.x_reference, self.x_increment, self.x_origin, self.time_scale.multiplier
        )
    }

    /// Calibrated `(time, voltage)` pairs.
    pub fn points(&self, samples: &[f64]) -> Vec<(f64, f64)> {
        samples
            .iter()
            .enumerate()
            .map(|(i, &y)| (self.x_at(i), y))
            .collect()
    }
}
