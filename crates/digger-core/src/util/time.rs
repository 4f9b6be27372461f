use chrono::{DateTime, Duration, Utc};

use crate::DiggerError;

/// Convert an input string into an absolute time. The input is first tried
/// as an RFC-3339 timestamp and then as a signed duration relative to `now`
/// (e.g. "-25m", "1h30m"). Empty input means "no time configured".
pub fn parse_time_or_duration(
    input: &str,
    now: DateTime<Utc>,
) -> Result<Option<DateTime<Utc>>, DiggerError> {
    if input.is_empty() {
        return Ok(None);
    }

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(input) {
        return Ok(Some(timestamp.with_timezone(&Utc)));
    }

    let duration =
        parse_duration(input).ok_or_else(|| DiggerError::InvalidTime(input.to_string()))?;
    Ok(Some(now + duration))
}

/// Parse a signed duration of the form `[-+]?(<decimal><unit>)+` with units
/// `ms`, `s`, `m`, `h`.
fn parse_duration(input: &str) -> Option<Duration> {
    let (negative, mut rest) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input.strip_prefix('+').unwrap_or(input)),
    };
    if rest.is_empty() {
        return None;
    }

    let mut total_ms = 0.0f64;

    while !rest.is_empty() {
        let number_end = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        if number_end == 0 {
            return None;
        }
        let value: f64 = rest[..number_end].parse().ok()?;
        rest = &rest[number_end..];

        // "ms" must be matched before "m" and "s".
        let (unit_ms, unit_len) = if rest.starts_with("ms") {
            (1.0, 2)
        } else if rest.starts_with('s') {
            (1_000.0, 1)
        } else if rest.starts_with('m') {
            (60_000.0, 1)
        } else if rest.starts_with('h') {
            (3_600_000.0, 1)
        } else {
            return None;
        };

        total_ms += value * unit_ms;
        rest = &rest[unit_len..];
    }

    if negative {
        total_ms = -total_ms;
    }
    Some(Duration::milliseconds(total_ms.round() as i64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_time_or_duration() {
        let now = Utc.with_ymd_and_hms(2020, 10, 28, 20, 30, 5).unwrap();

        assert_eq!(parse_time_or_duration("", now).unwrap(), None);

        assert_eq!(
            parse_time_or_duration("-25m", now).unwrap(),
            Some(now - Duration::minutes(25)),
        );

        assert_eq!(
            parse_time_or_duration("2020-10-29T10:12:44Z", now).unwrap(),
            Some(Utc.with_ymd_and_hms(2020, 10, 29, 10, 12, 44).unwrap()),
        );

        assert!(parse_time_or_duration("bad time", now).is_err());
    }

    #[test]
    fn test_parse_time_round_trip() {
        let now = Utc::now();

        let parsed = parse_time_or_duration("2021-03-04T05:06:07Z", now)
            .unwrap()
            .unwrap();
        assert_eq!(
            parsed.to_rfc3339_opts(chrono::SecondsFormat::Secs, true),
            "2021-03-04T05:06:07Z",
        );
    }

    #[test]
    fn test_parse_duration_forms() {
        let now = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();

        assert_eq!(
            parse_time_or_duration("1h30m", now).unwrap(),
            Some(now + Duration::minutes(90)),
        );
        assert_eq!(
            parse_time_or_duration("250ms", now).unwrap(),
            Some(now + Duration::milliseconds(250)),
        );
        assert_eq!(
            parse_time_or_duration("1.5h", now).unwrap(),
            Some(now + Duration::minutes(90)),
        );
    }
}
