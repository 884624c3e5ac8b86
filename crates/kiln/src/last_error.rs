//! Fixed-capacity last-error record.

use std::fmt;

use crate::config::ERROR_MESSAGE_CAPACITY;

/// Most recent error reported on a context: a numeric code plus a formatted
/// message of at most [`ERROR_MESSAGE_CAPACITY`] bytes.
///
/// Setting an error overwrites the previous one completely. Messages longer
/// than the buffer are cut at the last UTF-8 character boundary that fits.
pub struct LastError {
    code: i32,
    len: usize,
    buf: [u8; ERROR_MESSAGE_CAPACITY],
}

impl LastError {
    /// An empty record: code 0, empty message.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            code: 0,
            len: 0,
            buf: [0; ERROR_MESSAGE_CAPACITY],
        }
    }

    /// Replaces the record with `code` and the formatted message.
    pub fn set(&mut self, code: i32, args: fmt::Arguments<'_>) {
        self.code = code;
        self.len = 0;
        // A full buffer stops formatting early; the prefix is kept.
        let _ = fmt::write(self, args);
    }

    /// Error code, 0 when nothing has been reported.
    #[inline]
    #[must_use]
    pub fn code(&self) -> i32 {
        self.code
    }

    /// Error message, empty when nothing has been reported.
    #[must_use]
    pub fn message(&self) -> &str {
        std::str::from_utf8(&self.buf[..self.len]).unwrap_or_default()
    }

    /// Whether an error has been reported since the last clear.
    #[must_use]
    pub fn is_set(&self) -> bool {
        self.code != 0 || self.len != 0
    }

    /// Resets to code 0 and an empty message.
    pub fn clear(&mut self) {
        self.code = 0;
        self.len = 0;
    }
}

impl fmt::Write for LastError {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        let room = ERROR_MESSAGE_CAPACITY - self.len;
        let mut take = s.len().min(room);
        while !s.is_char_boundary(take) {
            take -= 1;
        }

        self.buf[self.len..self.len + take].copy_from_slice(&s.as_bytes()[..take]);
        self.len += take;

        if take < s.len() {
            Err(fmt::Error)
        } else {
            Ok(())
        }
    }
}

impl Default for LastError {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LastError")
            .field("code", &self.code)
            .field("message", &self.message())
            .finish()
    }
}

impl fmt::Display for LastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "error {}: {}", self.code, self.message())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_by_default() {
        let err = LastError::default();
        assert_eq!(err.code(), 0);
        assert_eq!(err.message(), "");
        assert!(!err.is_set());
    }

    #[test]
    fn test_set_overwrites_without_leftovers() {
        let mut err = LastError::new();
        err.set(42, format_args!("boom: {}", 42));
        assert_eq!(err.code(), 42);
        assert_eq!(err.message(), "boom: 42");

        err.set(0, format_args!("ok"));
        assert_eq!(err.code(), 0);
        assert_eq!(err.message(), "ok");
        assert!(err.is_set());
    }

    #[test]
    fn test_long_message_is_truncated() {
        let mut err = LastError::new();
        let long = "x".repeat(1000);
        err.set(7, format_args!("{long}"));
        assert_eq!(err.message().len(), ERROR_MESSAGE_CAPACITY);
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let mut err = LastError::new();
        // 255 ASCII bytes leave one byte, too small for a 2-byte char.
        let prefix = "a".repeat(ERROR_MESSAGE_CAPACITY - 1);
        err.set(1, format_args!("{prefix}é and more"));
        assert_eq!(err.message(), prefix);
    }

    #[test]
    fn test_clear() {
        let mut err = LastError::new();
        err.set(3, format_args!("bad"));
        err.clear();
        assert!(!err.is_set());
        assert_eq!(err.to_string(), "error 0: ");
    }
}
