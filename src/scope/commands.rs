//! Translation of abstract operations into SCPI command strings.
//!
//! Every operation becomes one semicolon-joined batch so the instrument answers
//! all embedded queries in a single reply. Two operations need a second batch
//! whose contents depend on the first reply; see [`followup`].

use crate::error::ScopeError;
use crate::types::{Channel, CommandRequest, Coupling, Operation, TimeReference, TriggerSource};

/// Point counts above this switch the acquisition to raw (full precision) mode.
pub const PRECISION_THRESHOLD: u32 = 1000;
/// Fixed vertical range applied by `Init`, in volts.
pub const INIT_VERTICAL_RANGE: u32 = 16;

pub const TIME_RANGE_QUERY: &str = ":TIM:RANG?";
pub const RESET: &str = "*RST";

/// Precision directive for a waveform of `points` samples.
pub fn precision_directive(points: u32) -> &'static str {
    if points > PRECISION_THRESHOLD {
        ":WAV:POIN:MODE RAW"
    } else {
        ":WAV:POIN:MODE NORM"
    }
}

pub fn trigger_source(source: TriggerSource) -> String {
    format!(":TRIG:EDGE:SOUR {source}")
}

pub fn waveform_source(channel: Channel) -> String {
    format!(":WAV:SOUR {channel}")
}

pub fn time_position(offset: f64) -> String {
    format!(":TIM:POS {offset:E}")
}

/// Command batch for the waveform fetch: the reply is
/// `<vertical range>;<preamble>;<data block>`.
pub fn plot(channel: Channel, points: u32) -> String {
    [
        precision_directive(points).to_string(),
        format!(":WAV:POIN {points}"),
        waveform_source(channel),
        ":SING".to_string(),
        format!(":{channel}:DISP ON"),
        ":WAV:FORM ASC".to_string(),
        format!(":{channel}:RANG?"),
        ":WAV:PRE?".to_string(),
        ":WAV:DATA?".to_string(),
    ]
    .join(";")
}

pub fn initialize(channel: Channel, time_range: f64) -> String {
    [
        RESET.to_string(),
        precision_directive(PRECISION_THRESHOLD).to_string(),
        format!(":{channel}:PROB 10"),
        format!(":{channel}:COUP {}", Coupling::Ac),
        format!(":{channel}:RANG {INIT_VERTICAL_RANGE}"),
        format!(":{channel}:OFFS 0"),
        ":TIM:MODE MAIN".to_string(),
        format!(":TIM:REF {}", TimeReference::Left.scpi()),
        time_position(0.0),
        format!(":TIM:RANG {time_range:E}"),
        ":TRIG:MODE EDGE".to_string(),
        trigger_source(TriggerSource::Channel(channel)),
        ":TRIG:EDGE:SLOP EITH".to_string(),
    ]
    .join(";")
}

/// First command batch for `request`.
///
/// Returns `None` only for a status query without a channel, where nothing
/// has to be set before the status battery runs.
pub fn build(request: &CommandRequest) -> Option<String> {
    let channel = request.channel();
    let command = match &request.operation {
        Operation::Plot { points } => plot(channel, *points),
        Operation::AutoScale { trigger } => [
            format!(":AUT {channel}"),
            waveform_source(channel),
            format!(":{channel}:DISP ON"),
            trigger_source(*trigger),
        ]
        .join(";"),
        // The position offset depends on the current range, so ask first.
        Operation::SetTimeReference(_) => TIME_RANGE_QUERY.to_string(),
        Operation::SetCoupling(coupling) => format!(":{channel}:COUP {coupling}"),
        Operation::SetTimeRange(range) => {
            [format!(":TIM:RANG {range:E}"), ":SING".to_string(), ":TIM:REF?".to_string()]
                .join(";")
        }
        Operation::SetVerticalRange(range) => format!(":{channel}:RANG {range:E}V"),
        Operation::SetVerticalScale(scale) => format!(":{channel}:SCAL {scale:E}V"),
        Operation::SetTriggerChannel(source) => trigger_source(*source),
        Operation::Initialize { time_range } => initialize(channel, *time_range),
        Operation::Reset => RESET.to_string(),
        Operation::StatusQuery => return request.requested_channel.map(waveform_source),
    };
    Some(command)
}

/// Second command batch derived from the reply to [`build`]'s batch.
pub fn followup(request: &CommandRequest, reply: &str) -> Result<Option<String>, ScopeError> {
    match &request.operation {
        Operation::SetTimeReference(reference) => {
            let current_range = parse_number(reply, "time range")?;
            Ok(Some(format!(
                ":TIM:REF {};{}",
                reference.scpi(),
                time_position(reference.position_offset(current_range))
            )))
        }
        Operation::SetTimeRange(requested_range) => {
            let reference: TimeReference = reply.trim().parse().map_err(|_| {
                ScopeError::Decode(format!("unexpected time reference '{}'", reply.trim()))
            })?;
            Ok(Some(time_position(
                reference.position_offset(*requested_range),
            )))
        }
        _ => Ok(None),
    }
}

pub(crate) fn parse_number(text: &str, what: &str) -> Result<f64, ScopeError> {
    text.trim()
        .parse::<f64>()
        .map_err(|_| ScopeError::Decode(format!("{what} is not a number: '{}'", text.trim())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(operation: Operation, channel: Option<u8>) -> CommandRequest {
        CommandRequest::new(operation, channel.map(|c| Channel::new(c).unwrap()))
    }

    #[test]
    fn test_precision_directive_threshold() {
        assert_eq!(precision_directive(1001), ":WAV:POIN:MODE RAW");
        assert_eq!(precision_directive(1000), ":WAV:POIN:MODE NORM");
        assert_eq!(precision_directive(100), ":WAV:POIN:MODE NORM");
    }

    #[test]
    fn test_plot_batch_order() {
        let cmd = build(&request(Operation::Plot { points: 2000 }, Some(2))).unwrap();
        assert_eq!(
            cmd,
            ":WAV:POIN:MODE RAW;:WAV:POIN 2000;:WAV:SOUR CHAN2;:SING;:CHAN2:DISP ON;\
             :WAV:FORM ASC;:CHAN2:RANG?;:WAV:PRE?;:WAV:DATA?"
        );
        let precision = cmd.find(":WAV:POIN:MODE").unwrap();
        let count = cmd.find(":WAV:POIN 2000").unwrap();
        assert!(precision < count);
    }

    #[test]
    fn test_autoscale_uses_trigger_mapping() {
        let cmd = build(&request(
            Operation::AutoScale {
                trigger: TriggerSource::External,
            },
            Some(3),
        ))
        .unwrap();
        assert_eq!(cmd, ":AUT CHAN3;:WAV:SOUR CHAN3;:CHAN3:DISP ON;:TRIG:EDGE:SOUR EXT");
    }

    #[test]
    fn test_simple_setters() {
        assert_eq!(
            build(&request(Operation::SetCoupling(Coupling::Ac), Some(1))).unwrap(),
            ":CHAN1:COUP AC"
        );
        assert_eq!(
            build(&request(Operation::SetVerticalRange(8.0), Some(4))).unwrap(),
            ":CHAN4:RANG 8E0V"
        );
        assert_eq!(
            build(&request(Operation::SetVerticalScale(0.5), None)).unwrap(),
            ":CHAN1:SCAL 5E-1V"
        );
        assert_eq!(build(&request(Operation::Reset, None)).unwrap(), "*RST");
    }

    #[test]
    fn test_time_reference_two_step() {
        let req = request(Operation::SetTimeReference(TimeReference::Left), None);
        assert_eq!(build(&req).unwrap(), TIME_RANGE_QUERY);
        assert_eq!(
            followup(&req, "+2.000E+00\n").unwrap().unwrap(),
            ":TIM:REF LEFT;:TIM:POS 2E-1"
        );

        let right = request(Operation::SetTimeReference(TimeReference::Right), None);
        assert_eq!(
            followup(&right, "1").unwrap().unwrap(),
            ":TIM:REF RIGH;:TIM:POS -1E-1"
        );

        let center = request(Operation::SetTimeReference(TimeReference::Center), None);
        assert_eq!(
            followup(&center, "1").unwrap().unwrap(),
            ":TIM:REF CENT;:TIM:POS 0E0"
        );
        assert!(followup(&center, "garbage").is_err());
    }

    #[test]
    fn test_time_range_uses_requested_range() {
        let req = request(Operation::SetTimeRange(2.0), None);
        assert_eq!(build(&req).unwrap(), ":TIM:RANG 2E0;:SING;:TIM:REF?");
        assert_eq!(followup(&req, "LEFT").unwrap().unwrap(), ":TIM:POS 2E-1");
        assert_eq!(followup(&req, "RIGH\n").unwrap().unwrap(), ":TIM:POS -2E-1");
        assert!(followup(&req, "UP").is_err());
    }

    #[test]
    fn test_initialize_sequence() {
        let cmd = build(&request(Operation::Initialize { time_range: 1.0 }, Some(1))).unwrap();
        assert_eq!(
            cmd,
            "*RST;:WAV:POIN:MODE NORM;:CHAN1:PROB 10;:CHAN1:COUP AC;:CHAN1:RANG 16;\
             :CHAN1:OFFS 0;:TIM:MODE MAIN;:TIM:REF LEFT;:TIM:POS 0E0;:TIM:RANG 1E0;\
             :TRIG:MODE EDGE;:TRIG:EDGE:SOUR CHAN1;:TRIG:EDGE:SLOP EITH"
        );
    }

    #[test]
    fn test_status_query_selects_source_only_when_asked() {
        assert_eq!(build(&request(Operation::StatusQuery, None)), None);
        assert_eq!(
            build(&request(Operation::StatusQuery, Some(2))).unwrap(),
            ":WAV:SOUR CHAN2"
        );
    }

    #[test]
    fn test_no_followup_for_single_step_operations() {
        let req = request(Operation::Reset, None);
        assert_eq!(followup(&req, "").unwrap(), None);
    }
}
