use once_cell::sync::Lazy;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::VecDeque;
use std::env::var;
use std::io;
use std::mem::forget;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

const MAX_LOG_LINES: usize = 20000;

// Values following these keys never reach the in-memory log
const MASKED_KEYWORDS: [&str; 6] = [
    "password",
    "csrftoken",
    "csrf_token",
    "X-CSRFToken",
    "sessionid",
    "token",
];

static MASKS: Lazy<Vec<Regex>> = Lazy::new(|| {
    MASKED_KEYWORDS
        .iter()
        .filter_map(|keyword| mask_regex(keyword).ok())
        .collect()
});

fn mask_regex(keyword: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!(
        r#"(?P<key>"?(\b{})"?\s*[:=]?\s*)("(?P<val1>[^"]+)"|(?P<val2>\b[^\s",}}]+))"#,
        regex::escape(keyword)
    ))
}

#[derive(Debug, Default)]
pub struct MemoryWriterData {
    logs: VecDeque<String>,
    to_take: usize,
}

/// Keeps the latest log lines in memory, newest first, so a front end can show them
#[derive(Debug, Clone, Default)]
pub struct MemoryWriter {
    data: Arc<Mutex<MemoryWriterData>>,
}

impl MemoryWriter {
    pub fn new(data: Arc<Mutex<MemoryWriterData>>) -> Self {
        Self { data }
    }

    fn sanitize_keywords(input: &str, masks: &[Regex]) -> String {
        let mut output = input.to_string();
        for re in masks {
            output = re
                .replace_all(&output, |caps: &regex::Captures| {
                    let key = &caps["key"];
                    let val1 = caps.name("val1").map_or("", |m| m.as_str());
                    let val2 = caps.name("val2").map_or("", |m| m.as_str());
                    let val = if !val1.is_empty() { val1 } else { val2 };
                    let quotes = if !val1.is_empty() { "\"" } else { "" };
                    format!("{}{}{}{}", key, quotes, "*".repeat(val.len()), quotes)
                })
                .to_string();
        }
        output
    }

    fn push_line(&self, line: &str) {
        let sanitized = Self::sanitize_keywords(line, &MASKS);
        let mut data = self.data.lock();
        if data.logs.len() >= MAX_LOG_LINES {
            data.logs.pop_back();
        }
        data.logs.push_front(sanitized);
        if data.to_take < MAX_LOG_LINES {
            data.to_take += 1;
        }
    }

    /// Lines logged since the previous call, newest first
    pub fn get_new_logs(&self) -> String {
        let mut data = self.data.lock();
        let new_logs = data
            .logs
            .iter()
            .take(data.to_take)
            .fold(String::new(), |acc, x| format!("{}\n{}", acc, x));
        data.to_take = 0;
        new_logs
    }

    pub fn get_all_logs(&self) -> String {
        self.data
            .lock()
            .logs
            .iter()
            .fold(String::new(), |acc, x| format!("{}\n{}", acc, x))
    }
}

impl io::Write for MemoryWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let text = String::from_utf8_lossy(buf);
        for line in text.lines().filter(|l| !l.trim().is_empty()) {
            self.push_line(line);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for MemoryWriter {
    type Writer = MemoryWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

pub struct ConsoleLogger {
    memory_writer: MemoryWriter,
}

impl ConsoleLogger {
    pub fn get_new_logs(&self) -> String {
        self.memory_writer.get_new_logs()
    }

    pub fn get_all_logs(&self) -> String {
        self.memory_writer.get_all_logs()
    }
}

/// Installs the global subscriber: stdout, the in-memory buffer and Sentry.
/// The filter comes from `ALLSAFE_LOG_LEVEL` and defaults to `info`.
pub fn init_logger() -> ConsoleLogger {
    let memory_writer = MemoryWriter::default();
    let log_spec = var("ALLSAFE_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
    let filter = EnvFilter::try_new(&log_spec).unwrap_or_else(|e| {
        eprintln!("Invalid ALLSAFE_LOG_LEVEL '{}': {}, using info", log_spec, e);
        EnvFilter::new("info")
    });

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(memory_writer.clone()),
        )
        .with(sentry_tracing::layer())
        .try_init();
    if let Err(e) = result {
        // Use print, there is no subscriber of ours to report to
        println!("Logger already initialized: {}", e);
    }

    ConsoleLogger { memory_writer }
}

pub fn init_sentry(url: &str, release: &str) {
    let release = release.to_string();
    let sentry = sentry::init((
        url,
        sentry::ClientOptions {
            release: if release.is_empty() {
                sentry::release_name!()
            } else {
                Some(release.into())
            },
            traces_sample_rate: 1.0,
            ..Default::default()
        },
    ));

    if sentry.is_enabled() {
        info!("Sentry initialized");
    } else {
        error!("Sentry initialization failed");
    }
    // Reporting stays on for the lifetime of the process
    forget(sentry);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_log_sanitization() {
        let test_log = r#"{"username": "admin", "password": "secret"}"#;
        let sanitized_log = MemoryWriter::sanitize_keywords(test_log, &MASKS);
        assert_eq!(
            sanitized_log,
            r#"{"username": "admin", "password": "******"}"#
        );

        let header_log = "POST /api/plugins/ X-CSRFToken: abc123";
        let sanitized_log = MemoryWriter::sanitize_keywords(header_log, &MASKS);
        assert_eq!(sanitized_log, "POST /api/plugins/ X-CSRFToken: ******");
    }

    #[test]
    fn test_log_storage_in_memory_writer() {
        let mut writer = MemoryWriter::default();
        writer.write_all(b"first line\n").unwrap();
        writer.write_all(b"second line\n").unwrap();

        let data = writer.data.lock();
        assert_eq!(data.logs.len(), 2);
        assert_eq!(data.logs[0], "second line");
    }

    #[test]
    fn test_new_logs_are_taken_once() {
        let mut writer = MemoryWriter::default();
        writer.write_all(b"enrolled 10.0.0.1\n").unwrap();
        assert!(writer.get_new_logs().contains("enrolled 10.0.0.1"));
        assert_eq!(writer.get_new_logs(), "");
        assert!(writer.get_all_logs().contains("enrolled 10.0.0.1"));
    }

    #[test]
    fn test_memory_writer_is_bounded() {
        let mut writer = MemoryWriter::default();
        for i in 0..MAX_LOG_LINES + 5 {
            writer.write_all(format!("line {}\n", i).as_bytes()).unwrap();
        }
        let data = writer.data.lock();
        assert_eq!(data.logs.len(), MAX_LOG_LINES);
        assert_eq!(data.logs[0], format!("line {}", MAX_LOG_LINES + 4));
    }
}
