use bytes::Bytes;

/// Incremental server-sent-events scanner.
///
/// Feed raw network chunks in any fragmentation and get back the `data:`
/// payloads of completed events. An event ends at an empty line; multiple
/// `data:` lines within one event are joined with `\n` per the SSE spec.
/// Comment lines (leading `:`) and unrecognized fields are ignored.
#[derive(Debug, Default)]
pub struct SseScanner {
    buffer: String,
    data_lines: Vec<String>,
}

impl SseScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, bytes: &Bytes) -> Vec<String> {
        self.push_str(&String::from_utf8_lossy(bytes))
    }

    pub fn push_str(&mut self, input: &str) -> Vec<String> {
        self.buffer.push_str(input);

        let mut payloads = Vec::new();
        while let Some(pos) = self.buffer.find('\n') {
            let mut line: String = self.buffer.drain(..=pos).collect();
            while line.ends_with('\n') || line.ends_with('\r') {
                line.pop();
            }
            if let Some(payload) = self.accept_line(&line) {
                payloads.push(payload);
            }
        }
        payloads
    }

    /// Flushes whatever remains after the upstream closed the connection.
    /// A final event not terminated by an empty line is still emitted.
    pub fn finish(mut self) -> Option<String> {
        let line: String = self.buffer.drain(..).collect();
        let line = line.trim_end_matches(['\r', '\n']);
        if !line.is_empty() {
            self.accept_line(line);
        }
        self.flush_event()
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.flush_event();
        }
        if line.starts_with(':') {
            return None;
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines
                .push(rest.strip_prefix(' ').unwrap_or(rest).to_owned());
        }
        // event:, id: and retry: fields carry nothing we relay.
        None
    }

    fn flush_event(&mut self) -> Option<String> {
        if self.data_lines.is_empty() {
            return None;
        }
        Some(self.data_lines.drain(..).collect::<Vec<_>>().join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_event() {
        let mut scanner = SseScanner::new();
        let payloads = scanner.push_str("data: {\"a\":1}\n\n");
        assert_eq!(payloads, vec!["{\"a\":1}".to_owned()]);
        assert_eq!(scanner.finish(), None);
    }

    #[test]
    fn event_split_across_chunks() {
        let mut scanner = SseScanner::new();
        assert!(scanner.push_str("da").is_empty());
        assert!(scanner.push_str("ta: {\"a\"").is_empty());
        assert!(scanner.push_str(":1}\n").is_empty());
        let payloads = scanner.push_str("\ndata: {\"b\":2}\n\n");
        assert_eq!(
            payloads,
            vec!["{\"a\":1}".to_owned(), "{\"b\":2}".to_owned()]
        );
    }

    #[test]
    fn boundary_inside_crlf() {
        let mut scanner = SseScanner::new();
        assert!(scanner.push_str("data: x\r").is_empty());
        let payloads = scanner.push_str("\n\r\n");
        assert_eq!(payloads, vec!["x".to_owned()]);
    }

    #[test]
    fn multiple_data_lines_join_with_newline() {
        let mut scanner = SseScanner::new();
        let payloads = scanner.push_str("data: one\ndata: two\n\n");
        assert_eq!(payloads, vec!["one\ntwo".to_owned()]);
    }

    #[test]
    fn comments_and_other_fields_ignored() {
        let mut scanner = SseScanner::new();
        let payloads = scanner.push_str(": keepalive\nevent: message\nid: 7\ndata: p\n\n");
        assert_eq!(payloads, vec!["p".to_owned()]);
    }

    #[test]
    fn finish_flushes_unterminated_event() {
        let mut scanner = SseScanner::new();
        assert!(scanner.push_str("data: tail").is_empty());
        assert_eq!(scanner.finish(), Some("tail".to_owned()));
    }

    #[test]
    fn multiple_events_in_one_chunk() {
        let mut scanner = SseScanner::new();
        let payloads = scanner.push_str("data: 1\n\ndata: 2\n\ndata: 3\n\n");
        assert_eq!(
            payloads,
            vec!["1".to_owned(), "2".to_owned(), "3".to_owned()]
        );
    }
}
