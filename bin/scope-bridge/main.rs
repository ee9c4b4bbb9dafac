use clap::Parser;
use env_logger::Env;
use log::{LevelFilter, error, info, warn};
use scope_bridge::{
    AppConfig, CommandRequest, Operation, RequestParams, Response, ScopeBridge, ScopeError,
    load_config_or_default, preview_waveform,
};
use std::io::{self, Write};
use std::path::PathBuf;

/// Oscilloscope bridge: runs one front-end request against the instrument
#[derive(Parser, Debug)]
#[command(name = "scope-bridge")]
#[command(about = "Plot waveforms and adjust settings of a networked oscilloscope", long_about = None)]
struct Args {
    /// Operation tag (Plot, AutoScale, TimRef, Coupling, TimRange, VertRange,
    /// VertScale, TrgChannel, Init, Reset, Status)
    operation: String,

    /// Channel number (1-4)
    #[arg(long)]
    channel: Option<String>,

    /// Plot colour as hex RGB
    #[arg(long)]
    color: Option<String>,

    /// Operation value (time range, reference, coupling, trigger source ...)
    #[arg(long)]
    value: Option<String>,

    /// Waveform points to acquire
    #[arg(long)]
    points: Option<u32>,

    #[arg(long)]
    width: Option<u32>,

    #[arg(long)]
    height: Option<u32>,

    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Instrument host, overrides the configuration
    #[arg(long)]
    host: Option<String>,

    /// Draw the waveform in the terminal instead of running the plotter
    #[arg(long)]
    preview: bool,

    /// Write status records as JSON instead of a script
    #[arg(long)]
    json: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let (mut config, load_error) = load_config_or_default(args.config.as_deref())?;

    let log_level = args
        .log_level
        .clone()
        .unwrap_or_else(|| config.logging.log_level.clone());
    initialize_logging(&log_level);
    match load_error {
        Some(e) => warn!("Failed to load config ({}), using defaults", e),
        None => info!("Configuration loaded successfully"),
    }

    if let Some(host) = &args.host {
        config.instrument.host = host.clone();
    }
    log_startup_info(&config);

    let bridge = ScopeBridge::new(config);
    let params = RequestParams {
        channel: args.channel.clone(),
        color: args.color.clone(),
        value: args.value.clone(),
        width: args.width,
        height: args.height,
        points: args.points,
    };

    if args.preview {
        return run_preview(&bridge, &args.operation, &params);
    }

    let response = bridge.handle(&args.operation, &params)?;
    write_response(&response, args.json)
}

fn run_preview(
    bridge: &ScopeBridge,
    operation: &str,
    params: &RequestParams,
) -> Result<(), Box<dyn std::error::Error>> {
    let defaults = bridge.config().plot.default_style()?;
    let request = CommandRequest::from_params(operation, params, &defaults)?;
    let Operation::Plot { points } = request.operation else {
        error!("--preview only applies to Plot");
        return Err(ScopeError::InvalidOperation(operation.to_string()).into());
    };

    let acquisition = bridge.acquire(request.channel(), points)?;
    preview_waveform(
        &acquisition.points(),
        &request.channel().label(),
        acquisition.calibration.unit(),
        non_zero(params.width),
        non_zero(params.height),
    )?;
    Ok(())
}

fn non_zero(value: Option<u32>) -> Option<u32> {
    value.filter(|v| *v > 0)
}

fn write_response(response: &Response, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let mut stdout = io::stdout().lock();
    match response {
        Response::Plot(bytes) => stdout.write_all(bytes)?,
        Response::Status(record) if json => writeln!(stdout, "{}", record.to_json()?)?,
        Response::Status(record) => stdout.write_all(record.to_script().as_bytes())?,
    }
    stdout.flush()?;
    Ok(())
}

fn log_startup_info(config: &AppConfig) {
    let endpoint = config.instrument.endpoint();
    if endpoint.is_simulated() {
        info!("No instrument host configured, running without hardware");
    } else {
        info!("Instrument: {} ({:?})", endpoint.host, endpoint.kind);
    }
}

fn initialize_logging(log_level: &str) {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => LevelFilter::Trace,
        "debug" => LevelFilter::Debug,
        "info" => LevelFilter::Info,
        "warn" => LevelFilter::Warn,
        "error" => LevelFilter::Error,
        _ => {
            eprintln!("Warning: Invalid log level '{}', using 'info'", log_level);
            LevelFilter::Info
        }
    };

    // stdout carries the payload, so logs go to stderr
    env_logger::Builder::from_env(Env::default())
        .filter_level(level)
        .format_timestamp_millis()
        .target(env_logger::Target::Stderr)
        .init();
}
