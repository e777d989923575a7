use colored::Colorize;
use core::fmt;
use std::{
    io,
    sync::{Arc, Mutex, PoisonError},
};

pub const DEFAULT_LOG_CAPACITY: usize = 4096;

/// Messages a handler wrote through its context logger, bounded in bytes.
#[derive(Debug)]
pub struct LogStream {
    lines: Vec<String>,
    capacity: usize, // in bytes
    current_bytesize: usize,
}

impl Default for LogStream {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl fmt::Display for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.lines {
            write!(f, "{line}")?;
        }
        Ok(())
    }
}

impl LogStream {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: Vec::new(),
            capacity,
            current_bytesize: 0,
        }
    }

    /// Appends `message`, cutting it at the nearest char boundary once the
    /// capacity is reached. Everything after the cut is dropped.
    pub fn append(&mut self, message: &str) {
        if message.is_empty() || self.is_full() {
            return;
        }

        let (truncated, kept) =
            truncate_to_char_boundary(message, self.capacity - self.current_bytesize);
        let mut line = kept.to_string();
        self.current_bytesize += line.len();
        if truncated {
            line.push_str("...[TRUNCATED]".red().to_string().as_str());
            self.current_bytesize = self.capacity;
        }

        self.lines.push(line);
    }

    fn is_full(&self) -> bool {
        self.current_bytesize >= self.capacity
    }

    #[must_use]
    pub fn last_message(&self) -> Option<&str> {
        self.lines.last().map(String::as_str)
    }
}

// truncate `&str` to length at most equal to `max`
// return `true` if it were truncated, and the new str.
fn truncate_to_char_boundary(s: &str, mut max: usize) -> (bool, &str) {
    if max >= s.len() {
        (false, s)
    } else {
        while !s.is_char_boundary(max) {
            max -= 1;
        }
        (true, &s[..max])
    }
}

pub(crate) type SharedLogStream = Arc<Mutex<LogStream>>;

/// Handle to the invocation's log buffer, returned by
/// [`InvocationContext::logger`](crate::InvocationContext::logger).
#[derive(Debug, Clone)]
pub struct ContextLogger {
    stream: SharedLogStream,
}

impl ContextLogger {
    pub(crate) fn new(stream: SharedLogStream) -> Self {
        Self { stream }
    }

    /// Appends `message` followed by a newline.
    pub fn log(&self, message: impl AsRef<str>) {
        let mut stream = self.stream.lock().unwrap_or_else(PoisonError::into_inner);
        stream.append(message.as_ref());
        stream.append("\n");
    }
}

impl io::Write for ContextLogger {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .append(&String::from_utf8_lossy(buf));
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_bounded_log() {
        let mut bounded_log = LogStream::with_capacity(15);
        bounded_log.append("hello world");
        assert_eq!(Some("hello world"), bounded_log.last_message());
    }

    #[test]
    fn test_bounded_log_when_truncated() {
        let mut bounded_log = LogStream::with_capacity(10);
        bounded_log.append("hello world");
        let truncation_message = "...[TRUNCATED]".red().to_string();
        assert_eq!(
            Some(format!("hello worl{}", truncation_message).as_str()),
            bounded_log.last_message()
        );

        bounded_log.append("dropped");
        assert_eq!(1, bounded_log.lines.len());
    }

    #[test]
    fn test_bounded_log_when_truncated_nearest_valid_utf8() {
        let mut bounded_log = LogStream::with_capacity(15);
        bounded_log.append("✌️✌️✌️"); // ✌️ is 6 bytes, ✌ is 3;
        let truncation_message = "...[TRUNCATED]".red().to_string();
        assert_eq!(
            Some(format!("✌\u{fe0f}✌\u{fe0f}✌{}", truncation_message).as_str()),
            bounded_log.last_message()
        );
    }

    #[test]
    fn test_logger_appends_lines() {
        let stream = SharedLogStream::default();
        let mut logger = ContextLogger::new(stream.clone());

        logger.log("loading function");
        write!(logger, "value1 = {}", "value1").unwrap();

        assert_eq!(
            "loading function\nvalue1 = value1",
            stream.lock().unwrap().to_string()
        );
    }
}
