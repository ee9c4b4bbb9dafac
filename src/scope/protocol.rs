use crate::error::ScopeError;
use crate::types::{PreambleRecord, Waveform};
use log::debug;
use std::str::FromStr;

/// Fields in a preamble reply; an optional trailing reserved field is ignored.
pub const PREAMBLE_FIELDS: usize = 10;

/// Decoded reply of the plot command batch.
#[derive(Debug, Clone, PartialEq)]
pub struct WaveformReply {
    pub vertical_range: f64,
    pub preamble: PreambleRecord,
    pub waveform: Waveform,
}

/// Low-level parsing of instrument replies
pub struct Protocol;

impl Protocol {
    /// Split `<range>;<preamble>;<block>` and decode each part.
    pub fn decode_waveform_reply(reply: &str) -> Result<WaveformReply, ScopeError> {
        let mut segments = reply.splitn(3, ';');
        let (Some(range), Some(preamble), Some(block)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(ScopeError::Decode(format!(
                "expected range;preamble;data, got {} bytes without two separators",
                reply.len()
            )));
        };

        let vertical_range = parse_field::<f64>(range, "vertical range")?;
        let preamble = Self::parse_preamble(preamble)?;
        if preamble.points == 0 {
            return Err(ScopeError::Decode(
                "preamble reports zero waveform points".to_string(),
            ));
        }
        let payload = Self::strip_block_header(block.trim_start())?;
        let waveform = Self::parse_samples(payload)?;

        debug!(
            "Decoded waveform: range {} V, {} points announced, {} samples received",
            vertical_range,
            preamble.points,
            waveform.len()
        );

        Ok(WaveformReply {
            vertical_range,
            preamble,
            waveform,
        })
    }

    pub fn parse_preamble(text: &str) -> Result<PreambleRecord, ScopeError> {
        let fields: Vec<&str> = text.trim().split(',').collect();
        if fields.len() != PREAMBLE_FIELDS && fields.len() != PREAMBLE_FIELDS + 1 {
            return Err(ScopeError::Decode(format!(
                "preamble has {} fields, expected {} or {}",
                fields.len(),
                PREAMBLE_FIELDS,
                PREAMBLE_FIELDS + 1
            )));
        }

        Ok(PreambleRecord {
            format: parse_integer(fields[0], "format")? as i32,
            kind: parse_integer(fields[1], "type")? as i32,
            points: parse_count(fields[2], "points")?,
            count: parse_integer(fields[3], "count")? as i32,
            x_increment: parse_field(fields[4], "x increment")?,
            x_origin: parse_field(fields[5], "x origin")?,
            x_reference: parse_field(fields[6], "x reference")?,
            y_increment: parse_field(fields[7], "y increment")?,
            y_origin: parse_field(fields[8], "y origin")?,
            y_reference: parse_field(fields[9], "y reference")?,
        })
    }

    /// Remove a definite-length block header `#<N><N digits>` and return the
    /// payload that follows it.
    pub fn strip_block_header(block: &str) -> Result<&str, ScopeError> {
        let bytes = block.as_bytes();
        if bytes.first() != Some(&b'#') {
            return Err(ScopeError::MalformedBlock(
                "data block does not start with '#'".to_string(),
            ));
        }
        let digit_count = match bytes.get(1) {
            Some(d) if d.is_ascii_digit() => (d - b'0') as usize,
            _ => {
                return Err(ScopeError::MalformedBlock(
                    "block header has no length digit".to_string(),
                ));
            }
        };
        let header_len = 2 + digit_count;
        match bytes.get(2..header_len) {
            Some(length) if length.iter().all(u8::is_ascii_digit) => Ok(&block[header_len..]),
            _ => Err(ScopeError::MalformedBlock(format!(
                "block header announces {digit_count} length digits"
            ))),
        }
    }

    /// Comma-separated ASCII samples in acquisition order.
    pub fn parse_samples(payload: &str) -> Result<Waveform, ScopeError> {
        let payload = payload.trim();
        if payload.is_empty() {
            return Ok(Waveform::default());
        }
        let samples = payload
            .split(',')
            .map(|s| parse_field::<f64>(s, "sample"))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Waveform { samples })
    }
}

pub(crate) fn parse_field<T: FromStr>(text: &str, name: &str) -> Result<T, ScopeError> {
    text.trim()
        .parse::<T>()
        .map_err(|_| ScopeError::Decode(format!("invalid {name}: '{}'", text.trim())))
}

// Instruments report integer fields in NR3 form (e.g. `+1.00000E+03`) as well.
fn parse_integer(text: &str, name: &str) -> Result<i64, ScopeError> {
    let value = parse_field::<f64>(text, name)?;
    if value.is_finite() && value.fract() == 0.0 {
        Ok(value as i64)
    } else {
        Err(ScopeError::Decode(format!(
            "{name} is not an integer: '{}'",
            text.trim()
        )))
    }
}

pub(crate) fn parse_count(text: &str, name: &str) -> Result<u32, ScopeError> {
    u32::try_from(parse_integer(text, name)?)
        .map_err(|_| ScopeError::Decode(format!("{name} out of range: '{}'", text.trim())))
}
