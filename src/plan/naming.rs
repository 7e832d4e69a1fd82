use std::fmt::Write;

use time::OffsetDateTime;

use crate::calendar::file_stamp;

pub const OUTPUT_EXTENSION: &str = "csv";
const ESCAPE: char = '~';

/// Map a tag onto a string usable as part of a file name.
///
/// Bytes outside `[A-Za-z0-9._-]`, the escape character itself and a
/// leading `.` are written as `~XX`. The mapping is injective, so distinct
/// tags never share a file name.
pub fn escape_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for (idx, byte) in raw.bytes().enumerate() {
        let plain = byte.is_ascii_alphanumeric() || byte == b'_' || byte == b'-' || byte == b'.';
        if plain && !(idx == 0 && byte == b'.') {
            out.push(byte as char);
        } else {
            let _ = write!(out, "{ESCAPE}{byte:02X}");
        }
    }
    out
}

/// `<tag>_<start>_<end>.csv`
pub fn unit_file_name(tag: &str, start: OffsetDateTime, end: OffsetDateTime) -> String {
    format!(
        "{}_{}_{}.{OUTPUT_EXTENSION}",
        escape_component(tag),
        file_stamp(start),
        file_stamp(end)
    )
}
