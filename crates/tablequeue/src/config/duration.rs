//! ISO-8601 duration literals (`PT0.1S`, `PT5M`, `P1DT2H`)

use std::time::Duration;

/// Unparsable duration literal
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid ISO-8601 duration: {0:?}")]
pub struct InvalidDuration(pub String);

const SECONDS_PER_DAY: u64 = 86_400;

/// Parse `PnDTnHnMn.nS`. Every part is optional but at least one must be
/// present; only seconds may carry a fraction (up to nanoseconds). Negative
/// durations are rejected.
pub fn parse_duration(text: &str) -> Result<Duration, InvalidDuration> {
    let invalid = || InvalidDuration(text.to_string());
    let upper = text.trim().to_ascii_uppercase();
    let rest = upper.strip_prefix('P').ok_or_else(invalid)?;

    let (date, time) = match rest.split_once('T') {
        Some((date, time)) => (date, Some(time)),
        None => (rest, None),
    };

    let mut total = Duration::ZERO;
    let mut components = 0;

    if !date.is_empty() {
        let days = date.strip_suffix('D').and_then(parse_whole).ok_or_else(invalid)?;
        let seconds = days.checked_mul(SECONDS_PER_DAY).ok_or_else(invalid)?;
        total = Duration::from_secs(seconds);
        components += 1;
    }

    if let Some(mut time) = time {
        if time.is_empty() {
            return Err(invalid());
        }
        let mut units = ['H', 'M', 'S'].into_iter();
        while !time.is_empty() {
            let end = time
                .find(|c: char| c.is_ascii_alphabetic())
                .ok_or_else(invalid)?;
            let (number, unit) = (&time[..end], time.as_bytes()[end] as char);
            // Units must appear in H, M, S order and at most once
            if !units.any(|expected| expected == unit) {
                return Err(invalid());
            }
            let part = match unit {
                'H' => parse_whole(number)
                    .and_then(|hours| hours.checked_mul(3_600))
                    .map(Duration::from_secs),
                'M' => parse_whole(number)
                    .and_then(|minutes| minutes.checked_mul(60))
                    .map(Duration::from_secs),
                _ => parse_seconds(number),
            }
            .ok_or_else(invalid)?;
            total = total.checked_add(part).ok_or_else(invalid)?;
            components += 1;
            time = &time[end + 1..];
        }
    }

    if components == 0 {
        return Err(invalid());
    }
    Ok(total)
}

/// Parse a comma-separated list of durations
pub fn parse_duration_list(text: &str) -> Result<Vec<Duration>, InvalidDuration> {
    text.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(parse_duration)
        .collect()
}

fn parse_whole(text: &str) -> Option<u64> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

fn parse_seconds(text: &str) -> Option<Duration> {
    let (whole, fraction) = match text.split_once(['.', ',']) {
        Some((whole, fraction)) => (whole, Some(fraction)),
        None => (text, None),
    };
    let seconds = parse_whole(whole)?;
    let nanos = match fraction {
        None => 0,
        Some(fraction) if (1..=9).contains(&fraction.len()) => {
            let digits = parse_whole(fraction)?;
            digits * 10u64.pow(9 - fraction.len() as u32)
        }
        Some(_) => return None,
    };
    Some(Duration::new(seconds, nanos as u32))
}
