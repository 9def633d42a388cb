//! Line-oriented decoder for the analyzer's NDJSON progress stream.
//!
//! The analyzer writes one JSON progress event per line to stderr. Chunks
//! arrive at arbitrary boundaries, so [`ProgressParser`] buffers the trailing
//! partial line between calls to [`ProgressParser::feed`].
//!
//! Each complete, non-blank line is routed one of three ways:
//! - a valid [`ProgressEvent`] goes to the progress callback;
//! - JSON that is not a progress event is dropped;
//! - anything that is not JSON goes to the optional line callback, since it is
//!   usually a human-readable error the user should see.

use konveyor_types::ProgressEvent;

type ProgressCallback = Box<dyn FnMut(ProgressEvent) + Send>;
type LineCallback = Box<dyn FnMut(&str) + Send>;

pub struct ProgressParser {
    buffer: Vec<u8>,
    on_progress: ProgressCallback,
    on_line: Option<LineCallback>,
}

impl ProgressParser {
    pub fn new(on_progress: impl FnMut(ProgressEvent) + Send + 'static) -> Self {
        Self {
            buffer: Vec::new(),
            on_progress: Box::new(on_progress),
            on_line: None,
        }
    }

    /// Receive lines that are not JSON at all.
    #[must_use]
    pub fn with_line_handler(mut self, on_line: impl FnMut(&str) + Send + 'static) -> Self {
        self.on_line = Some(Box::new(on_line));
        self
    }

    /// Append a chunk and process every line it completes.
    pub fn feed(&mut self, chunk: impl AsRef<[u8]>) {
        self.buffer.extend_from_slice(chunk.as_ref());

        let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return;
        };
        let rest = self.buffer.split_off(last_newline + 1);
        let complete = std::mem::replace(&mut self.buffer, rest);

        for line in complete.split(|&b| b == b'\n') {
            self.process_line(&String::from_utf8_lossy(line));
        }
    }

    /// Discard any buffered partial line.
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Bytes held back waiting for a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    fn process_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => match ProgressEvent::from_value(value) {
                Some(event) => (self.on_progress)(event),
                None => tracing::trace!("Dropping non-progress JSON line from analyzer"),
            },
            Err(_) => {
                if let Some(on_line) = self.on_line.as_mut() {
                    on_line(line);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use konveyor_types::ProgressStage;

    use super::*;

    type Seen<T> = Arc<Mutex<Vec<T>>>;

    fn recording_parser() -> (ProgressParser, Seen<ProgressEvent>, Seen<String>) {
        let events: Seen<ProgressEvent> = Arc::default();
        let lines: Seen<String> = Arc::default();
        let events_sink = Arc::clone(&events);
        let lines_sink = Arc::clone(&lines);
        let parser = ProgressParser::new(move |e| events_sink.lock().unwrap().push(e))
            .with_line_handler(move |l| lines_sink.lock().unwrap().push(l.to_string()));
        (parser, events, lines)
    }

    fn sample_event() -> ProgressEvent {
        let mut event = ProgressEvent::new("2025-06-01T12:00:00Z", ProgressStage::RuleExecution)
            .with_counts(17, 240)
            .with_message("javax-to-jakarta-00042");
        event.percent = Some(27.5);
        event.metadata = Some(serde_json::json!({ "provider": "java" }));
        event
    }

    #[test]
    fn reassembles_event_split_at_every_offset() {
        let event = sample_event();
        let line = format!("{}\n", serde_json::to_string(&event).unwrap());
        let bytes = line.as_bytes();

        for split in 0..=bytes.len() {
            let (mut parser, events, lines) = recording_parser();
            parser.feed(&bytes[..split]);
            parser.feed(&bytes[split..]);

            let events = events.lock().unwrap();
            assert_eq!(events.len(), 1, "split at {split}");
            assert_eq!(events[0], event);
            assert!(lines.lock().unwrap().is_empty());
        }
    }

    #[test]
    fn no_event_before_newline_arrives() {
        let (mut parser, events, _) = recording_parser();
        let json = serde_json::to_string(&sample_event()).unwrap();
        parser.feed(json.as_str());
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(parser.pending_len(), json.len());

        parser.feed("\n");
        assert_eq!(events.lock().unwrap().len(), 1);
        assert_eq!(parser.pending_len(), 0);
    }

    #[test]
    fn batch_of_lines_in_one_chunk_keeps_order() {
        let (mut parser, events, _) = recording_parser();
        let chunk: String = ProgressStage::ALL
            .iter()
            .map(|stage| {
                let event = ProgressEvent::new("t", *stage);
                format!("{}\n", serde_json::to_string(&event).unwrap())
            })
            .collect();
        parser.feed(chunk);

        let stages: Vec<ProgressStage> = events.lock().unwrap().iter().map(|e| e.stage).collect();
        assert_eq!(stages, ProgressStage::ALL.to_vec());
    }

    #[test]
    fn complete_lines_then_trailing_fragment() {
        let (mut parser, events, _) = recording_parser();
        let init = serde_json::to_string(&ProgressEvent::new("t", ProgressStage::Init)).unwrap();
        let done = serde_json::to_string(&ProgressEvent::new("t", ProgressStage::Complete)).unwrap();
        let (head, tail) = done.split_at(10);

        parser.feed(format!("{init}\n{init}\n{head}"));
        assert_eq!(events.lock().unwrap().len(), 2);

        parser.feed(format!("{tail}\n"));
        let events = events.lock().unwrap();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].stage, ProgressStage::Complete);
    }

    #[test]
    fn invalid_stage_is_silently_dropped() {
        let (mut parser, events, lines) = recording_parser();
        parser.feed("{\"timestamp\": \"2025-01-01\", \"stage\": \"invalid_stage\"}\n");
        parser.feed("{\"stage\": \"init\"}\n");
        parser.feed("{\"level\": \"info\", \"msg\": \"provider ready\"}\n");
        assert!(events.lock().unwrap().is_empty());
        assert!(lines.lock().unwrap().is_empty());
    }

    #[test]
    fn non_json_goes_to_line_handler_trimmed() {
        let (mut parser, events, lines) = recording_parser();
        parser.feed("ERROR: boom\n");
        parser.feed("   panic: runtime error \r\n");
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(
            *lines.lock().unwrap(),
            vec!["ERROR: boom".to_string(), "panic: runtime error".to_string()]
        );
    }

    #[test]
    fn blank_lines_are_ignored() {
        let (mut parser, events, lines) = recording_parser();
        parser.feed("\n\n   \n\t\n");
        assert!(events.lock().unwrap().is_empty());
        assert!(lines.lock().unwrap().is_empty());
    }

    #[test]
    fn missing_line_handler_is_safe() {
        let count = Arc::new(Mutex::new(0));
        let counter = Arc::clone(&count);
        let mut parser = ProgressParser::new(move |_| *counter.lock().unwrap() += 1);
        parser.feed("this is not json\n{broken\n");
        assert_eq!(*count.lock().unwrap(), 0);
    }

    #[test]
    fn multibyte_character_split_across_chunks() {
        let (mut parser, events, _) = recording_parser();
        let event = ProgressEvent::new("t", ProgressStage::ProviderInit).with_message("démarrage");
        let line = format!("{}\n", serde_json::to_string(&event).unwrap());
        let bytes = line.as_bytes();
        let split = line.find('é').unwrap() + 1;
        parser.feed(&bytes[..split]);
        parser.feed(&bytes[split..]);
        assert_eq!(events.lock().unwrap()[0].message.as_deref(), Some("démarrage"));
    }

    #[test]
    fn reset_discards_partial_line() {
        let (mut parser, events, lines) = recording_parser();
        parser.feed("{\"timestamp\":\"t\",");
        parser.reset();
        parser.feed("\"stage\":\"init\"}\n");
        assert!(events.lock().unwrap().is_empty());
        assert_eq!(lines.lock().unwrap().len(), 1);
    }
}
