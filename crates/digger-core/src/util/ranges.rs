use std::collections::BTreeSet;
use std::sync::OnceLock;

use regex::Regex;

use crate::DiggerError;

fn range_regex() -> &'static Regex {
    static RANGE_REGEX: OnceLock<Regex> = OnceLock::new();
    RANGE_REGEX.get_or_init(|| {
        #[allow(clippy::unwrap_used)]
        Regex::new(r"^([0-9]+)(-([0-9]+))?$").unwrap()
    })
}

/// Parse range strings like "1-2" or "3,5-6" into the set of integers they
/// cover. An empty input yields an empty set.
pub fn parse_range_str(range_str: &str) -> Result<BTreeSet<i32>, DiggerError> {
    let mut values = BTreeSet::new();
    if range_str.is_empty() {
        return Ok(values);
    }

    for component in range_str.split(',') {
        let groups = range_regex()
            .captures(component)
            .ok_or_else(|| DiggerError::InvalidRange(range_str.to_string()))?;

        let start: i32 = groups[1]
            .parse()
            .map_err(|_| DiggerError::InvalidRange(range_str.to_string()))?;

        match groups.get(3) {
            None => {
                values.insert(start);
            }
            Some(end) => {
                let end: i32 = end
                    .as_str()
                    .parse()
                    .map_err(|_| DiggerError::InvalidRange(range_str.to_string()))?;
                if start > end {
                    return Err(DiggerError::InvalidRange(format!(
                        "range start cannot be greater than end: {component}"
                    )));
                }
                values.extend(start..=end);
            }
        }
    }

    Ok(values)
}
