//! Minimal server-sent-events reader.
//!
//! Only `data:` fields matter to the execution channel. Comments, `event:`,
//! `id:` and `retry:` lines are skipped. An event is dispatched on the blank
//! line that ends it, an unterminated event at end of stream is dropped.

use futures::stream::{self, Stream, StreamExt};
use futures::future;

#[derive(Debug, Default)]
pub struct SseDecoder {
    pending: Vec<u8>,
    data: Vec<String>,
}

impl SseDecoder {
    /// Feeds raw body bytes, returns the payloads of every event completed by them
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(chunk);
        let mut events = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let raw: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.line(line) {
                events.push(event);
            }
        }
        events
    }

    fn line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            if self.data.is_empty() {
                return None;
            }
            let event = self.data.join("\n");
            self.data.clear();
            return Some(event);
        }
        if line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        }
        None
    }
}

/// Turns a byte stream into a stream of event payloads, errors passed through in order
pub fn data_stream<S, B, E>(body: S) -> impl Stream<Item = Result<String, E>>
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
{
    body.scan(SseDecoder::default(), |decoder, chunk| {
        let items: Vec<Result<String, E>> = match chunk {
            Ok(bytes) => decoder.feed(bytes.as_ref()).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        future::ready(Some(stream::iter(items)))
    })
    .flatten()
}
