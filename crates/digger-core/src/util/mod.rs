mod ranges;
mod time;

pub use ranges::parse_range_str;
pub use time::parse_time_or_duration;
