//! Element-set text parsing
//!
//! Input is a flat list of lines where each satellite is an optional name line followed by
//! the two fixed-format element lines (`1 ...`, `2 ...`). Anything that does not line up is
//! skipped one line at a time, so a stray line never shifts the groups after it.

use std::collections::HashMap;

use super::ElementRecord;

const LINE1_MARKER: &str = "1 ";
const LINE2_MARKER: &str = "2 ";
const NAME_PREFIX: &str = "0 ";

fn is_line1(line: &str) -> bool {
    line.starts_with(LINE1_MARKER)
}

fn is_line2(line: &str) -> bool {
    line.starts_with(LINE2_MARKER)
}

fn is_name(line: &str) -> bool {
    !line.is_empty() && !is_line1(line) && !is_line2(line)
}

/// Parse every well-formed group in `text`, keyed by satellite name
///
/// Later groups with a duplicate name replace earlier ones. Groups whose element lines carry
/// the right markers but fail to decode are dropped.
pub fn parse_element_sets(text: &str) -> HashMap<String, ElementRecord> {
    let lines: Vec<&str> = text.lines().map(str::trim).collect();
    let mut records = HashMap::new();
    let mut dropped = 0usize;

    let mut i = 0;
    while i < lines.len() {
        let window = &lines[i..];
        let (name, line1, line2, consumed) = match window {
            [name, line1, line2, ..] if is_name(name) && is_line1(line1) && is_line2(line2) => {
                (Some(*name), *line1, *line2, 3)
            }
            [line1, line2, ..] if is_line1(line1) && is_line2(line2) => (None, *line1, *line2, 2),
            _ => {
                i += 1;
                continue;
            }
        };
        i += consumed;

        match decode_group(name, line1, line2) {
            Some(record) => {
                records.insert(record.name().to_string(), record);
            }
            None => dropped += 1,
        }
    }

    if dropped > 0 {
        tracing::debug!("Dropped {} undecodable element groups", dropped);
    }
    records
}

fn decode_group(name: Option<&str>, line1: &str, line2: &str) -> Option<ElementRecord> {
    let name = name.map(|n| n.strip_prefix(NAME_PREFIX).unwrap_or(n).trim().to_string());

    let elements = sgp4::Elements::from_tle(name.clone(), line1.as_bytes(), line2.as_bytes()).ok()?;
    let constants = sgp4::Constants::from_elements(&elements).ok()?;
    let epoch = elements.datetime.and_utc();

    let name = name
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| elements.norad_id.to_string());

    Some(ElementRecord::new(name, elements.norad_id, epoch, constants))
}
