//! Server-Sent Events decoding for streamed backend responses

/// Incremental SSE decoder
///
/// Bytes arrive in arbitrary slices; the decoder buffers partial lines and
/// collects `data:` lines into events. An event is complete at the blank line
/// that terminates it; its payload is the event's data lines joined with `\n`.
/// Comment lines (`:`) and other fields (`event:`, `id:`, `retry:`) are ignored.
///
/// # Example
/// ```
/// use parley_cli::llm::streaming::SseDecoder;
///
/// let mut decoder = SseDecoder::new();
/// assert!(decoder.push(b"data: {\"a\":").is_empty());
/// assert_eq!(decoder.push(b"1}\n\n"), vec!["{\"a\":1}"]);
///
/// decoder.push(b"data: {\"b\":2}");
/// assert_eq!(decoder.finish(), vec!["{\"b\":2}"]);
/// ```
#[derive(Debug, Default)]
pub struct SseDecoder {
    /// Bytes after the last newline seen
    partial_line: Vec<u8>,
    /// Data lines of the event being assembled
    event_data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return the payloads of every event completed by them
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.partial_line.extend_from_slice(bytes);

        let mut completed = Vec::new();
        while let Some(newline) = self.partial_line.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.partial_line.drain(..=newline).collect();
            // Decode whole lines only so multi-byte characters split across
            // chunks survive intact
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\n', '\r']);
            if let Some(payload) = self.accept_line(line) {
                completed.push(payload);
            }
        }
        completed
    }

    /// Flush the trailing event of a stream that ended without a blank line
    pub fn finish(&mut self) -> Vec<String> {
        let rest = std::mem::take(&mut self.partial_line);
        let rest = String::from_utf8_lossy(&rest);
        let line = rest.trim_end_matches(['\n', '\r']);
        if !line.is_empty() {
            self.accept_line(line);
        }
        self.take_event().into_iter().collect()
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            return self.take_event();
        }
        if let Some(value) = line.strip_prefix("data:") {
            self.event_data
                .push(value.strip_prefix(' ').unwrap_or(value).to_string());
        }
        None
    }

    fn take_event(&mut self) -> Option<String> {
        if self.event_data.is_empty() {
            return None;
        }
        Some(std::mem::take(&mut self.event_data).join("\n"))
    }
}
