use chrono::Local;
use log::{debug, error, info, warn};
use std::time::Duration;

use crate::calibration::Calibration;
use crate::config::AppConfig;
use crate::error::ScopeError;
use crate::plotting::{self, GnuplotRenderer, PlotRequest, Renderer};
use crate::scope::commands::{self, TIME_RANGE_QUERY};
use crate::scope::protocol::{Protocol, WaveformReply};
use crate::scope::status::{self, StatusRecord};
use crate::scope::transport::{Transport, transport_for};
use crate::types::{Channel, CommandRequest, DeviceEndpoint, Operation, RequestParams};

/// Acquisitions the plot timeout is stretched to cover.
const ACQUISITION_WINDOWS: f64 = 10.0;
/// Upper bound on the stretch, whatever range the instrument reports.
const MAX_TIMEOUT_EXTENSION: Duration = Duration::from_secs(600);
const RENDER_TIMEOUT: Duration = Duration::from_secs(10);

/// Payload handed back to the front-end.
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// Rendered plot, or the plot description when rendering failed
    Plot(Vec<u8>),
    Status(StatusRecord),
}

/// One decoded and calibrated acquisition.
#[derive(Debug, Clone)]
pub struct Acquisition {
    pub channel: Channel,
    pub reply: WaveformReply,
    pub calibration: Calibration,
}

impl Acquisition {
    /// Samples paired with their calibrated time values.
    pub fn points(&self) -> Vec<(f64, f64)> {
        self.calibration.points(&self.reply.waveform.samples)
    }
}

/// Builder for [`ScopeBridge`]; transport and renderer default to the ones
/// the configuration names.
pub struct ScopeBridgeBuilder {
    config: AppConfig,
    transport: Option<Box<dyn Transport>>,
    renderer: Option<Box<dyn Renderer>>,
}

impl ScopeBridgeBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            transport: None,
            renderer: None,
        }
    }

    pub fn with_transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Box::new(transport));
        self
    }

    pub fn with_renderer(mut self, renderer: impl Renderer + 'static) -> Self {
        self.renderer = Some(Box::new(renderer));
        self
    }

    pub fn build(self) -> ScopeBridge {
        let endpoint = self.config.instrument.endpoint();
        let transport = self
            .transport
            .unwrap_or_else(|| transport_for(&endpoint, &self.config.instrument));
        let renderer = self.renderer.unwrap_or_else(|| {
            Box::new(GnuplotRenderer::new(&self.config.plot.gnuplot, RENDER_TIMEOUT))
        });

        ScopeBridge {
            config: self.config,
            endpoint,
            transport,
            renderer,
        }
    }
}

/// Turns front-end requests into instrument traffic and answers every one
/// of them with a [`Response`].
pub struct ScopeBridge {
    config: AppConfig,
    endpoint: DeviceEndpoint,
    transport: Box<dyn Transport>,
    renderer: Box<dyn Renderer>,
}

impl ScopeBridge {
    pub fn builder(config: AppConfig) -> ScopeBridgeBuilder {
        ScopeBridgeBuilder::new(config)
    }

    pub fn new(config: AppConfig) -> Self {
        ScopeBridgeBuilder::new(config).build()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &DeviceEndpoint {
        &self.endpoint
    }

    /// Parse a raw request and answer it.
    ///
    /// Unknown operations and unusable parameters are the caller's fault and
    /// come back as `Err`; anything that goes wrong afterwards is folded into
    /// the response.
    pub fn handle(&self, tag: &str, params: &RequestParams) -> Result<Response, ScopeError> {
        let defaults = self.config.plot.default_style()?;
        let request = CommandRequest::from_params(tag, params, &defaults).map_err(|e| {
            error!("Rejected request {tag}: {e}");
            e
        })?;
        Ok(self.respond(&request))
    }

    pub fn respond(&self, request: &CommandRequest) -> Response {
        info!("Handling {:?} on {}", request.operation, request.channel());
        match request.operation {
            Operation::Plot { points } => Response::Plot(self.plot(request, points)),
            _ => Response::Status(self.apply_and_report(request)),
        }
    }

    /// Read one waveform from `channel` and calibrate it.
    pub fn acquire(&self, channel: Channel, points: u32) -> Result<Acquisition, ScopeError> {
        let timeout = self.plot_timeout();
        let command = commands::plot(channel, points);

        debug!("Acquiring {points} points from {channel} (timeout {timeout:?})");
        let reply = Protocol::decode_waveform_reply(&self.transport.send(&command, timeout)?)?;
        let calibration = Calibration::new(&reply.preamble, reply.vertical_range);
        debug!(
            "Decoded {} samples, x in [{}, {}] {}",
            reply.waveform.len(),
            calibration.x_min,
            calibration.x_max,
            calibration.unit()
        );

        Ok(Acquisition {
            channel,
            reply,
            calibration,
        })
    }

    /// Instrument status, with `prior_error` reported unless the status
    /// query fails itself.
    pub fn status(&self, prior_error: Option<&str>) -> StatusRecord {
        status::assemble(
            self.transport.as_ref(),
            self.config.instrument.timeout(),
            prior_error,
        )
    }

    fn plot(&self, request: &CommandRequest, points: u32) -> Vec<u8> {
        let terminal = &self.config.plot.terminal;
        let description = if self.endpoint.is_simulated() {
            debug!("No instrument configured, plotting the imitator");
            plotting::imitator_plot(Local::now(), &request.style, terminal)
        } else {
            match self.acquire(request.channel(), points) {
                Ok(acquisition) => plotting::waveform_plot(
                    &acquisition.calibration,
                    &request.channel().label(),
                    &request.style,
                    terminal,
                    &acquisition.reply.waveform,
                ),
                Err(e) => {
                    warn!("Plot of {} failed: {}", request.channel(), e);
                    plotting::error_plot(&e.report(), &request.style, terminal)
                }
            }
        };

        self.render(description, request)
    }

    fn render(&self, plot: PlotRequest, request: &CommandRequest) -> Vec<u8> {
        match self.renderer.render(&plot) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Rendering failed: {}", e);
                // Nothing left to draw with, so hand back a description of
                // the failure instead.
                let fallback =
                    plotting::error_plot(&e.report(), &request.style, &self.config.plot.terminal);
                fallback.description.into_bytes()
            }
        }
    }

    fn apply_and_report(&self, request: &CommandRequest) -> StatusRecord {
        let prior_error = match self.apply(request) {
            Ok(()) => None,
            Err(e) => {
                warn!("{:?} failed: {}", request.operation, e);
                Some(e.report())
            }
        };
        self.status(prior_error.as_deref())
    }

    fn apply(&self, request: &CommandRequest) -> Result<(), ScopeError> {
        let timeout = self.config.instrument.timeout();
        let Some(command) = commands::build(request) else {
            return Ok(());
        };

        let reply = self.transport.send(&command, timeout)?;
        if let Some(next) = commands::followup(request, &reply)? {
            self.transport.send(&next, timeout)?;
        }
        Ok(())
    }

    /// Base timeout, stretched by the instrument's current time range when
    /// the configuration asks for it.
    fn plot_timeout(&self) -> Duration {
        let base = self.config.instrument.timeout();
        if !self.config.plot.extend_timeout {
            return base;
        }

        let time_range = self
            .transport
            .send(TIME_RANGE_QUERY, base)
            .and_then(|reply| commands::parse_number(&reply, "time range"));
        match time_range {
            Ok(range) => {
                let extension = Duration::try_from_secs_f64(range * ACQUISITION_WINDOWS)
                    .unwrap_or(Duration::ZERO)
                    .min(MAX_TIMEOUT_EXTENSION);
                base + extension
            }
            Err(e) => {
                warn!("Could not read time range, keeping base timeout: {}", e);
                base
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::transport::testing::ScriptedTransport;
    use crate::types::{Coupling, PlotStyle, TimeReference};
    use std::cell::RefCell;
    use std::rc::Rc;

    const WAVEFORM_REPLY: &str =
        "+8.0E+00;+4,+0,+4,+1,+1.0E-03,+0.0E+00,+0,+1.0E-02,+0.0E+00,+0;#210+0.5,-0.25";

    /// Echoes the description back and keeps every request it saw.
    #[derive(Clone, Default)]
    struct RecordingRenderer {
        seen: Rc<RefCell<Vec<PlotRequest>>>,
        fail: bool,
    }

    impl Renderer for RecordingRenderer {
        fn render(&self, plot: &PlotRequest) -> Result<Vec<u8>, ScopeError> {
            self.seen.borrow_mut().push(plot.clone());
            if self.fail {
                return Err(ScopeError::ProcessExit {
                    program: "gnuplot".into(),
                    status: "exit status: 1".into(),
                    output: "unknown terminal".into(),
                });
            }
            Ok(plot.description.clone().into_bytes())
        }
    }

    fn configured() -> AppConfig {
        let mut config = AppConfig::default();
        config.instrument.host = "scope.lab".into();
        config
    }

    fn bridge(
        config: AppConfig,
        transport: &ScriptedTransport,
        renderer: &RecordingRenderer,
    ) -> ScopeBridge {
        ScopeBridge::builder(config)
            .with_transport(transport.clone())
            .with_renderer(renderer.clone())
            .build()
    }

    fn plot_text(response: Response) -> String {
        match response {
            Response::Plot(bytes) => String::from_utf8(bytes).unwrap(),
            other => panic!("expected a plot, got {other:?}"),
        }
    }

    fn status_of(response: Response) -> StatusRecord {
        match response {
            Response::Status(record) => record,
            other => panic!("expected a status, got {other:?}"),
        }
    }

    #[test]
    fn test_plot_renders_calibrated_waveform() {
        let transport = ScriptedTransport::new(vec![
            Ok("+1.0E-03".into()),
            Ok(WAVEFORM_REPLY.into()),
        ]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(configured(), &transport, &renderer);
        let channel = Channel::new(2).unwrap();
        let request = CommandRequest::new(Operation::Plot { points: 4 }, Some(channel));

        let text = plot_text(bridge.respond(&request));
        assert!(text.contains("set title 'Channel 2'"));
        assert!(text.contains("set yrange [-4.4"));

        let sent = transport.sent();
        assert_eq!(sent[0], TIME_RANGE_QUERY);
        assert_eq!(sent[1], commands::plot(channel, 4));
        let seen = renderer.seen.borrow();
        assert_eq!(seen[0].data.as_deref(), Some("0.5\n-0.25\n"));
    }

    #[test]
    fn test_plot_without_timeout_extension_skips_range_query() {
        let mut config = configured();
        config.plot.extend_timeout = false;
        let transport = ScriptedTransport::new(vec![Ok(WAVEFORM_REPLY.into())]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(config, &transport, &renderer);

        let acquisition = bridge.acquire(Channel::FIRST, 4).unwrap();
        assert_eq!(acquisition.points().len(), 2);
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn test_failed_range_query_still_plots() {
        let transport = ScriptedTransport::new(vec![
            Err(ScopeError::Timeout(Duration::from_secs(3))),
            Ok(WAVEFORM_REPLY.into()),
        ]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(configured(), &transport, &renderer);
        let request = CommandRequest::new(Operation::Plot { points: 4 }, None);

        assert!(plot_text(bridge.respond(&request)).contains("set title 'Channel 1'"));
    }

    #[test]
    fn test_plot_failure_draws_error() {
        let transport = ScriptedTransport::new(vec![
            Ok("+1.0E-03".into()),
            Err(ScopeError::Timeout(Duration::from_secs(3))),
        ]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(configured(), &transport, &renderer);
        let request = CommandRequest::new(Operation::Plot { points: 1000 }, None);

        let text = plot_text(bridge.respond(&request));
        assert!(text.contains("set label 1 'TimeoutError: "));
    }

    #[test]
    fn test_malformed_block_draws_error() {
        let transport = ScriptedTransport::new(vec![
            Ok("+1.0E-03".into()),
            Ok("+8.0E+00;+4,+0,+4,+1,+1.0E-03,+0,+0,+1.0E-02,+0,+0;0.5,0.25".into()),
        ]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(configured(), &transport, &renderer);
        let request = CommandRequest::new(Operation::Plot { points: 4 }, None);

        assert!(plot_text(bridge.respond(&request)).contains("MalformedBlockError"));
    }

    #[test]
    fn test_render_failure_returns_description() {
        let transport = ScriptedTransport::new(vec![]);
        let renderer = RecordingRenderer {
            fail: true,
            ..Default::default()
        };
        let bridge = bridge(AppConfig::default(), &transport, &renderer);
        let request = CommandRequest::new(Operation::Plot { points: 1000 }, None);

        let text = plot_text(bridge.respond(&request));
        assert!(text.starts_with("set terminal svg"));
        assert!(text.contains("ExternalProcessError"));
    }

    #[test]
    fn test_unconfigured_plot_uses_imitator() {
        let transport = ScriptedTransport::new(vec![]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(AppConfig::default(), &transport, &renderer);
        let request = CommandRequest::new(Operation::Plot { points: 1000 }, None)
            .with_style(PlotStyle::default());

        assert!(plot_text(bridge.respond(&request)).contains("Imitator"));
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_time_reference_two_step() {
        let transport = ScriptedTransport::new(vec![
            Ok("+2.0E+00".into()),
            Ok(String::new()),
            Ok("CHAN1;LEFT;+1000;+2.0E+00;CHAN1".into()),
            Ok("AC;+8.0E+00;+1.0E+00".into()),
        ]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(configured(), &transport, &renderer);
        let request = CommandRequest::new(Operation::SetTimeReference(TimeReference::Left), None);

        let record = status_of(bridge.respond(&request));
        assert_eq!(record.err_msg, None);
        assert_eq!(record.time_ref, "LEFT");
        let sent = transport.sent();
        assert_eq!(sent[0], TIME_RANGE_QUERY);
        assert_eq!(sent[1], ":TIM:REF LEFT;:TIM:POS 2E-1");
        assert_eq!(sent[2], status::STATUS_BATTERY);
    }

    #[test]
    fn test_failed_setting_is_reported_in_status() {
        let transport = ScriptedTransport::new(vec![
            Err(ScopeError::Protocol("acknowledgement was '0'".into())),
            Ok("CHAN1;LEFT;+1000;+1.0E-03;CHAN1".into()),
            Ok("DC;+8.0E+00;+1.0E+00".into()),
        ]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(configured(), &transport, &renderer);
        let request = CommandRequest::new(Operation::SetCoupling(Coupling::Dc), None);

        let record = status_of(bridge.respond(&request));
        assert_eq!(record.coupling, "DC");
        assert_eq!(
            record.err_msg.as_deref(),
            Some("ProtocolError: Protocol error: acknowledgement was \\'0\\'")
        );
    }

    #[test]
    fn test_unconfigured_setting_reports_configuration_error() {
        let bridge = ScopeBridge::builder(AppConfig::default())
            .with_renderer(RecordingRenderer::default())
            .build();
        let request = CommandRequest::new(Operation::SetCoupling(Coupling::Ac), None);

        let record = status_of(bridge.respond(&request));
        assert!(record.err_msg.unwrap().starts_with("ConfigurationError"));
        assert_eq!(record.wave_source, "");
    }

    #[test]
    fn test_status_without_channel_sends_only_battery() {
        let transport = ScriptedTransport::new(vec![Ok("FUNC;CENT;+500;+1.0E+00;EXT".into())]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(configured(), &transport, &renderer);
        let request = CommandRequest::new(Operation::StatusQuery, None);

        let record = status_of(bridge.respond(&request));
        assert_eq!(record.wave_source, "FUNC");
        assert_eq!(transport.sent(), vec![status::STATUS_BATTERY.to_string()]);
    }

    #[test]
    fn test_unknown_operation_is_rejected() {
        let transport = ScriptedTransport::new(vec![]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(configured(), &transport, &renderer);

        let err = bridge.handle("Explode", &RequestParams::default()).unwrap_err();
        assert!(err.is_caller_fault());
        assert!(transport.sent().is_empty());
    }

    #[test]
    fn test_handle_parses_and_responds() {
        let transport = ScriptedTransport::new(vec![
            Ok(String::new()),
            Ok("CHAN3;LEFT;+1000;+1.0E-03;CHAN3".into()),
            Ok("AC;+4.0E+00;+5.0E-01".into()),
        ]);
        let renderer = RecordingRenderer::default();
        let bridge = bridge(configured(), &transport, &renderer);
        let params = RequestParams {
            channel: Some("3".into()),
            value: Some("4".into()),
            ..Default::default()
        };

        let record = status_of(bridge.handle("VertRange", &params).unwrap());
        assert_eq!(record.vertical_range, Some(4.0));
        assert_eq!(transport.sent()[0], ":CHAN3:RANG 4E0V");
    }
}
