//! Timestamp prefix rendering
//!
//! Lines are prefixed with wall-clock time as `[<seconds><microseconds>] `,
//! seconds since the Unix epoch immediately followed by six zero-padded
//! microsecond digits, e.g. `[1700000000000042] `.

use chrono::{DateTime, Utc};
use std::io::{Cursor, Write};

/// Size of the buffer a prefix is rendered into
pub const PREFIX_CAPACITY: usize = 32;

/// Fixed-size storage for one rendered prefix
pub type PrefixBuf = [u8; PREFIX_CAPACITY];

/// Render the current time into `buf`, returning the prefix length
pub fn render_prefix(buf: &mut PrefixBuf) -> usize {
    render_prefix_at(Utc::now(), buf)
}

/// Render `time` into `buf`, returning the prefix length
pub fn render_prefix_at(time: DateTime<Utc>, buf: &mut PrefixBuf) -> usize {
    let mut cursor = Cursor::new(&mut buf[..]);
    let written = write!(
        cursor,
        "[{}{:06}] ",
        time.timestamp(),
        time.timestamp_subsec_micros()
    );
    match written {
        Ok(()) => cursor.position() as usize,
        Err(_) => 0,
    }
}
