use crate::error::{ScopeError, sanitize_message};
use crate::scope::protocol::{parse_count, parse_field};
use crate::scope::transport::Transport;
use crate::types::TimeUnitScale;
use chrono::{DateTime, Local};
use log::{debug, warn};
use serde::Serialize;
use std::time::Duration;

/// Waveform source, time reference, point count, time range, trigger source.
pub const STATUS_BATTERY: &str = ":WAV:SOUR?;:TIM:REF?;:WAV:POIN?;:TIM:RANG?;:TRIG:EDGE:SOUR?";

/// Coupling, vertical range and vertical scale of the reported source.
pub fn channel_battery(source: &str) -> String {
    format!(":{source}:COUP?;:{source}:RANG?;:{source}:SCAL?")
}

/// Instrument settings shown next to the plot.
///
/// A record is always produced; when the instrument cannot be reached the
/// operational fields stay empty and `err_msg` says why.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusRecord {
    pub wave_source: String,
    pub time_ref: String,
    pub points: Option<u32>,
    pub time_range: Option<f64>,
    /// `time_range` expressed in `time_unit`
    pub time_scaled: Option<f64>,
    pub time_unit: String,
    pub trigger_source: String,
    pub coupling: String,
    pub vertical_range: Option<f64>,
    pub vertical_scale: Option<f64>,
    pub err_msg: Option<String>,
    pub created: DateTime<Local>,
}

impl StatusRecord {
    pub fn empty() -> Self {
        Self {
            wave_source: String::new(),
            time_ref: String::new(),
            points: None,
            time_range: None,
            time_scaled: None,
            time_unit: String::new(),
            trigger_source: String::new(),
            coupling: String::new(),
            vertical_range: None,
            vertical_scale: None,
            err_msg: None,
            created: Local::now(),
        }
    }

    /// Record with no instrument data, carrying only `message`.
    pub fn failed(message: &str) -> Self {
        Self {
            err_msg: Some(sanitize_message(message)),
            ..Self::empty()
        }
    }

    /// Render as a JavaScript function the front-end calls to obtain the record.
    pub fn to_script(&self) -> String {
        let text = |value: &str| format!("'{}'", js_escape(&sanitize_message(value)));
        let number = |value: Option<f64>| match value {
            Some(v) if v.is_finite() => v.to_string(),
            _ => "null".to_string(),
        };

        let fields = [
            ("waveSource", text(&self.wave_source)),
            ("timeRef", text(&self.time_ref)),
            ("points", self.points.map_or("null".to_string(), |p| p.to_string())),
            ("timeRange", number(self.time_range)),
            ("timeScaled", number(self.time_scaled)),
            ("timeUnit", text(&self.time_unit)),
            ("triggerSource", text(&self.trigger_source)),
            ("coupling", text(&self.coupling)),
            ("verticalRange", number(self.vertical_range)),
            ("verticalScale", number(self.vertical_scale)),
            (
                "errMsg",
                // Already sanitised when the record was built.
                self.err_msg
                    .as_deref()
                    .map_or("null".to_string(), |m| format!("'{}'", js_escape(m))),
            ),
            ("created", text(&self.created.format("%Y-%m-%d %H:%M:%S").to_string())),
        ];

        let body = fields
            .iter()
            .map(|(key, value)| format!("    {key}: {value}"))
            .collect::<Vec<_>>()
            .join(",\n");
        format!("function scopeStatus() {{\n  return {{\n{body}\n  }};\n}}\n")
    }

    pub fn to_json(&self) -> Result<String, ScopeError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn apply_battery(&mut self, reply: &str) -> Result<(), ScopeError> {
        let fields: Vec<&str> = reply.trim().split(';').map(str::trim).collect();
        let [source, time_ref, points, time_range, trigger] = fields.as_slice() else {
            return Err(ScopeError::Decode(format!(
                "status reply has {} fields, expected 5: '{}'",
                fields.len(),
                reply.trim()
            )));
        };

        let time_range = parse_field::<f64>(time_range, "time range")?;
        let scale = TimeUnitScale::from_magnitude(time_range);

        self.wave_source = source.to_string();
        self.time_ref = time_ref.to_string();
        self.points = Some(parse_count(points, "points")?);
        self.time_range = Some(time_range);
        self.time_scaled = Some(time_range * scale.multiplier);
        self.time_unit = scale.unit.to_string();
        self.trigger_source = trigger.to_string();
        Ok(())
    }

    fn apply_channel(&mut self, reply: &str) -> Result<(), ScopeError> {
        let fields: Vec<&str> = reply.trim().split(';').map(str::trim).collect();
        let [coupling, range, scale] = fields.as_slice() else {
            return Err(ScopeError::Decode(format!(
                "channel reply has {} fields, expected 3: '{}'",
                fields.len(),
                reply.trim()
            )));
        };

        self.coupling = coupling.to_string();
        self.vertical_range = Some(parse_field(range, "vertical range")?);
        self.vertical_scale = Some(parse_field(scale, "vertical scale")?);
        Ok(())
    }
}

/// Query the instrument's current settings.
///
/// Never fails: a failure while querying replaces `prior_error` as the
/// record's error text and leaves the instrument fields empty.
pub fn assemble(
    transport: &dyn Transport,
    timeout: Duration,
    prior_error: Option<&str>,
) -> StatusRecord {
    let mut record = StatusRecord::empty();
    match query(transport, timeout, &mut record) {
        Ok(()) => {
            record.err_msg = prior_error.map(sanitize_message);
            record
        }
        Err(e) => {
            warn!("Status query failed: {}", e);
            StatusRecord::failed(&e.report())
        }
    }
}

fn query(
    transport: &dyn Transport,
    timeout: Duration,
    record: &mut StatusRecord,
) -> Result<(), ScopeError> {
    let reply = transport.send(STATUS_BATTERY, timeout)?;
    record.apply_battery(&reply)?;

    // Coupling and vertical settings only exist for analog channels.
    if record.wave_source.starts_with("CHAN") {
        let reply = transport.send(&channel_battery(&record.wave_source), timeout)?;
        record.apply_channel(&reply)?;
    } else {
        debug!("Source {} is not a channel, skipping channel status", record.wave_source);
    }
    Ok(())
}

/// Line breaks and `<` inside an already sanitised string literal.
fn js_escape(text: &str) -> String {
    text.replace('\r', "\\r")
        .replace('\n', "\\n")
        .replace('<', "\\x3c")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scope::transport::testing::ScriptedTransport;

    #[test]
    fn test_full_status() {
        let transport = ScriptedTransport::new(vec![
            Ok("CHAN2;LEFT;+1000;+3.0E-06;EXT".into()),
            Ok("AC;+8.0E+00;+1.0E+00".into()),
        ]);
        let record = assemble(&transport, Duration::from_secs(1), None);

        assert_eq!(record.wave_source, "CHAN2");
        assert_eq!(record.time_ref, "LEFT");
        assert_eq!(record.points, Some(1000));
        assert_eq!(record.time_unit, "usec");
        assert!((record.time_scaled.unwrap() - 3.0).abs() < 1e-9);
        assert_eq!(record.trigger_source, "EXT");
        assert_eq!(record.coupling, "AC");
        assert_eq!(record.vertical_range, Some(8.0));
        assert_eq!(record.vertical_scale, Some(1.0));
        assert_eq!(record.err_msg, None);
        assert_eq!(
            transport.sent(),
            vec![STATUS_BATTERY.to_string(), channel_battery("CHAN2")]
        );
    }

    #[test]
    fn test_non_channel_source_skips_channel_query() {
        let transport = ScriptedTransport::new(vec![Ok("FUNC;CENT;+500;+1.0E+00;CHAN1".into())]);
        let record = assemble(&transport, Duration::from_secs(1), Some("it's late\n"));
        assert_eq!(record.wave_source, "FUNC");
        assert_eq!(record.coupling, "");
        assert_eq!(record.time_unit, "sec");
        assert_eq!(record.err_msg.as_deref(), Some("it\\'s late"));
        assert_eq!(transport.sent().len(), 1);
    }

    #[test]
    fn test_transport_failure_becomes_error_text() {
        let transport = ScriptedTransport::new(vec![Err(ScopeError::Configuration(
            "no instrument address configured".into(),
        ))]);
        let record = assemble(&transport, Duration::from_secs(1), Some("older failure"));
        assert_eq!(record.wave_source, "");
        assert_eq!(record.points, None);
        assert_eq!(record.time_range, None);
        let msg = record.err_msg.unwrap();
        assert!(msg.starts_with("ConfigurationError"));
    }

    #[test]
    fn test_partial_failure_clears_fields() {
        let transport = ScriptedTransport::new(vec![
            Ok("CHAN1;LEFT;+1000;+1.0E-03;CHAN1".into()),
            Err(ScopeError::Timeout(Duration::from_secs(1))),
        ]);
        let record = assemble(&transport, Duration::from_secs(1), None);
        assert_eq!(record.wave_source, "");
        assert!(record.err_msg.unwrap().starts_with("TimeoutError"));
    }

    #[test]
    fn test_malformed_battery_reply() {
        let transport = ScriptedTransport::new(vec![Ok("CHAN1;LEFT".into())]);
        let record = assemble(&transport, Duration::from_secs(1), None);
        assert!(record.err_msg.unwrap().starts_with("DecodeError"));
    }

    /// Byte offset just past the single-quoted literal starting at `text[0]`.
    fn literal_end(text: &str) -> Option<usize> {
        let mut chars = text.char_indices().skip(1);
        while let Some((i, c)) = chars.next() {
            match c {
                '\\' => {
                    chars.next();
                }
                '\'' => return Some(i + 1),
                '\n' => return None,
                _ => {}
            }
        }
        None
    }

    fn err_msg_literal(script: &str) -> &str {
        let start = script.find("errMsg: ").unwrap() + "errMsg: ".len();
        let rest = &script[start..];
        let end = literal_end(rest).expect("unterminated errMsg literal");
        assert!(rest[end..].starts_with(",\n"), "errMsg literal closes early: {rest}");
        &rest[..end]
    }

    #[test]
    fn test_script_literals_survive_backslashes() {
        for message in [
            r"unexpected time reference 'a\'; alert(1); //'",
            r"C:\scope\",
            "multi\nline </script><b>",
        ] {
            let script = StatusRecord::failed(message).to_script();
            let literal = err_msg_literal(&script);
            assert!(!literal.contains('<'), "unescaped '<' in {literal}");
        }

        let script = StatusRecord::failed(r"C:\scope\").to_script();
        assert_eq!(err_msg_literal(&script), r"'C:\\scope\\'");
    }

    #[test]
    fn test_script_fields_are_escaped_too() {
        let mut record = StatusRecord::empty();
        record.wave_source = r"CHAN1\".into();
        let script = record.to_script();
        assert!(script.contains(r"waveSource: 'CHAN1\\',"));
    }

    #[test]
    fn test_non_finite_numbers_render_as_null() {
        let mut record = StatusRecord::empty();
        record.time_range = Some(f64::INFINITY);
        record.vertical_scale = Some(f64::NAN);
        let script = record.to_script();
        assert!(script.contains("timeRange: null"));
        assert!(script.contains("verticalScale: null"));
        assert!(!script.contains(": inf"));
        assert!(!script.contains(": NaN"));
    }

    #[test]
    fn test_malformed_point_count_is_rejected() {
        for points in ["-5", "nan", "1e12", "12.5"] {
            let reply = format!("CHAN1;LEFT;{points};+1.0E-03;CHAN1");
            let transport = ScriptedTransport::new(vec![Ok(reply)]);
            let record = assemble(&transport, Duration::from_secs(1), None);
            assert_eq!(record.points, None);
            assert!(record.err_msg.unwrap().starts_with("DecodeError"), "{points}");
        }
    }

    #[test]
    fn test_script_rendering() {
        let mut record = StatusRecord::failed("can't reach 'scope'\n");
        record.time_unit = "msec".into();
        let script = record.to_script();
        assert!(script.starts_with("function scopeStatus() {"));
        assert!(script.contains("errMsg: 'can\\'t reach \\'scope\\''"));
        assert!(script.contains("timeUnit: 'msec'"));
        assert!(script.contains("points: null"));

        let json = record.to_json().unwrap();
        assert!(json.contains("\"errMsg\""));
        assert!(json.contains("\"timeUnit\": \"msec\""));
    }
}
