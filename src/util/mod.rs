pub mod format;
pub mod markdown;
pub mod path;

pub use format::{format_duration, format_size, format_timestamp, now_unix};
