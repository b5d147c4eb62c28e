use chrono::{DateTime, SecondsFormat, Utc};

const ARCHIVE_PREFIX: &str = "backup-";
const ARCHIVE_SUFFIX: &str = ".zip";

/// Filesystem-safe run timestamp: RFC 3339 with millisecond precision and
/// every `:` and `.` replaced by `-`.
pub fn archive_timestamp(now: DateTime<Utc>) -> String {
    now.to_rfc3339_opts(SecondsFormat::Millis, true)
        .replace([':', '.'], "-")
}

/// Name of the staging directory (and, with `.zip`, the archive) for a run.
pub fn run_name(timestamp: &str) -> String {
    format!("{ARCHIVE_PREFIX}{timestamp}")
}

pub fn archive_file_name(timestamp: &str) -> String {
    format!("{}{ARCHIVE_SUFFIX}", run_name(timestamp))
}

pub fn is_archive_file_name(name: &str) -> bool {
    name.len() > ARCHIVE_PREFIX.len() + ARCHIVE_SUFFIX.len()
        && name.starts_with(ARCHIVE_PREFIX)
        && name.ends_with(ARCHIVE_SUFFIX)
}

/// Timestamp embedded in an archive file name.
pub fn timestamp_of(name: &str) -> Option<&str> {
    name.strip_prefix(ARCHIVE_PREFIX)?.strip_suffix(ARCHIVE_SUFFIX)
}
