use anyhow::{anyhow, bail, ensure, Result};
use std::time::Duration;

/// Parses Go-style durations made of one or more `<integer><unit>` segments,
/// like `90s`, `5m` or `1h30m`. A bare `0` is the zero duration.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let s = s.trim();
    if s == "0" {
        return Ok(Duration::ZERO);
    }
    ensure!(!s.is_empty(), "empty duration");

    let mut total = Duration::ZERO;
    let mut rest = s;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
        ensure!(digits > 0, "{s}: expected a number before {rest:?}");
        let (value, tail) = rest.split_at(digits);
        let value = value.parse::<u64>()?;

        let letters = tail
            .find(|c: char| !c.is_ascii_alphabetic())
            .unwrap_or(tail.len());
        let (unit, tail) = tail.split_at(letters);
        let segment = match unit {
            "ms" => Some(Duration::from_millis(value)),
            "s" => Some(Duration::from_secs(value)),
            "m" => value.checked_mul(60).map(Duration::from_secs),
            "h" => value.checked_mul(60 * 60).map(Duration::from_secs),
            "d" => value.checked_mul(60 * 60 * 24).map(Duration::from_secs),
            "" => bail!("{s}: missing unit after {value}"),
            _ => bail!("{s}: invalid unit {unit:?} (expected one of 'ms', 's', 'm', 'h', or 'd')"),
        };

        total = segment
            .and_then(|d| total.checked_add(d))
            .ok_or_else(|| anyhow!("duration {s} overflows"))?;
        rest = tail;
    }
    Ok(total)
}
