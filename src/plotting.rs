//! Plot descriptions for the external plotter, plus a terminal preview.
//!
//! Descriptions are gnuplot command lines joined with `;` so they can be
//! passed with `-e`. Waveform plots read their samples, one per line, from
//! the plotter's standard input.

use crate::calibration::Calibration;
use crate::error::ScopeError;
use crate::process;
use crate::types::{PlotStyle, Waveform};
use chrono::{DateTime, Local};
use std::f64::consts::TAU;
use std::time::Duration;
use textplots::{Chart, Plot, Shape};

pub const IMITATOR_TITLE: &str = "Imitator";

/// Description plus the sample lines piped to the plotter, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct PlotRequest {
    pub description: String,
    pub data: Option<String>,
}

/// Anything that turns a [`PlotRequest`] into a displayable artifact.
pub trait Renderer {
    fn render(&self, plot: &PlotRequest) -> Result<Vec<u8>, ScopeError>;
}

/// Renders through a gnuplot process; the artifact is whatever the
/// configured terminal writes to standard output.
#[derive(Debug, Clone)]
pub struct GnuplotRenderer {
    program: String,
    timeout: Duration,
}

impl GnuplotRenderer {
    pub fn new(program: &str, timeout: Duration) -> Self {
        Self {
            program: program.to_string(),
            timeout,
        }
    }
}

impl Renderer for GnuplotRenderer {
    fn render(&self, plot: &PlotRequest) -> Result<Vec<u8>, ScopeError> {
        let input = plot.data.as_deref().unwrap_or("");
        let output = process::run(
            &self.program,
            &["-e", &plot.description],
            input.as_bytes(),
            self.timeout,
        )?;
        Ok(output.stdout)
    }
}

/// Quote `text` as a gnuplot single-quoted string on one line.
pub fn gnuplot_quote(text: &str) -> String {
    let flat = text
        .trim_end_matches(['\r', '\n'])
        .replace(['\r', '\n'], " ")
        .replace('\'', "''");
    format!("'{flat}'")
}

fn header(style: &PlotStyle, terminal: &str) -> Vec<String> {
    vec![format!(
        "set terminal {terminal} size {},{}",
        style.width, style.height
    )]
}

/// Calibrated waveform bounded by the calibration's axes, titled with the
/// channel label.
pub fn waveform_plot(
    calibration: &Calibration,
    label: &str,
    style: &PlotStyle,
    terminal: &str,
    waveform: &Waveform,
) -> PlotRequest {
    let mut lines = header(style, terminal);
    lines.extend([
        format!("set xrange [{}:{}]", calibration.x_min, calibration.x_max),
        format!(
            "set yrange [{}:{}]",
            -calibration.y_half_range, calibration.y_half_range
        ),
        format!("set xlabel {}", gnuplot_quote(&format!("Time [{}]", calibration.unit()))),
        "set ylabel 'Voltage [V]'".to_string(),
        format!("set title {}", gnuplot_quote(label)),
        "set grid".to_string(),
        format!(
            "plot '< cat' using ({}):1 with lines lc rgb {} notitle",
            calibration.x_expression(),
            gnuplot_quote(style.color.as_str())
        ),
    ]);

    PlotRequest {
        description: lines.join(";"),
        data: Some(waveform.to_lines()),
    }
}

/// Reference sine whose phase follows the wall clock, so successive
/// requests animate without an instrument.
pub fn imitator_plot(now: DateTime<Local>, style: &PlotStyle, terminal: &str) -> PlotRequest {
    let phase = (now.timestamp_millis() as f64 / 1000.0).rem_euclid(TAU);
    let mut lines = header(style, terminal);
    lines.extend([
        "set xrange [0:4*pi]".to_string(),
        "set yrange [-1.1:1.1]".to_string(),
        format!("set title {}", gnuplot_quote(IMITATOR_TITLE)),
        "set grid".to_string(),
        "set samples 400".to_string(),
        format!(
            "plot sin(x+{phase:.4}) with lines lc rgb {} title {}",
            gnuplot_quote(style.color.as_str()),
            gnuplot_quote(IMITATOR_TITLE)
        ),
    ]);

    PlotRequest {
        description: lines.join(";"),
        data: None,
    }
}

/// Empty frame with the failure text in its centre.
pub fn error_plot(message: &str, style: &PlotStyle, terminal: &str) -> PlotRequest {
    let mut lines = header(style, terminal);
    lines.extend([
        "unset border".to_string(),
        "unset tics".to_string(),
        "set xrange [0:1]".to_string(),
        "set yrange [0:1]".to_string(),
        format!("set label 1 {} at 0.5,0.5 center", gnuplot_quote(message)),
        // A constant outside the y range draws nothing.
        "plot 2 notitle".to_string(),
    ]);

    PlotRequest {
        description: lines.join(";"),
        data: None,
    }
}

/// Print a calibrated waveform to the terminal.
///
/// # Arguments
/// * `points` - Calibrated `(time, voltage)` pairs
/// * `title` - Title line printed above the chart
/// * `unit` - Time unit of the x values
/// * `width` - Optional plot width (default: 140)
/// * `height` - Optional plot height (default: 60)
pub fn preview_waveform(
    points: &[(f64, f64)],
    title: &str,
    unit: &str,
    width: Option<u32>,
    height: Option<u32>,
) -> Result<(), ScopeError> {
    if points.is_empty() {
        return Err(ScopeError::Decode("cannot preview an empty waveform".to_string()));
    }

    // textplots needs at least 32 columns
    let width = width.unwrap_or(140).max(32);
    let height = height.unwrap_or(60).max(3);

    let frame: Vec<(f32, f32)> = points.iter().map(|&(x, y)| (x as f32, y as f32)).collect();
    let x_min = frame.iter().fold(f32::INFINITY, |a, &(x, _)| a.min(x));
    let mut x_max = frame.iter().fold(f32::NEG_INFINITY, |a, &(x, _)| a.max(x));
    if x_max <= x_min {
        x_max = x_min + 1.0;
    }

    println!("{}", title);
    println!("X-axis: Time [{}] | Y-axis: Voltage [V]", unit);
    println!("{}", "─".repeat(width as usize));

    Chart::new(width, height, x_min, x_max)
        .lineplot(&Shape::Lines(&frame))
        .nice();

    Ok(())
}
