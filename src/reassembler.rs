//! Line reconstruction for the accounting command's columnar output.
//!
//! Output arrives in arbitrary chunks, so a chunk boundary may split a line.
//! The most recent header line is the width oracle: data lines are complete
//! when they have exactly the header's character width, and a header is
//! complete when it ends with the terminal column name.
//!
//! A line that is followed by a line terminator must already be complete.
//! If it is not, the stream is corrupted (not merely fragmented) and
//! [`FrameError`] is returned so the caller can restart the session.

use crate::error::FrameError;

/// A complete line reconstructed from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Line {
    Header(String),
    Data(String),
}

impl Line {
    pub fn as_str(&self) -> &str {
        match self {
            Line::Header(s) | Line::Data(s) => s,
        }
    }
}

/// Stateful reassembler; the `LineBuffer` of one sampling session.
#[derive(Debug, Clone)]
pub struct StreamReassembler {
    pending: Vec<u8>,
    header_width: Option<usize>,
    header_prefix: String,
    terminal_token: String,
}

enum Completeness {
    Complete(Line),
    Incomplete,
}

impl StreamReassembler {
    /// `header_prefix` is the first column name (identifies header
    /// candidates); `terminal_token` is the last column name.
    pub fn new(header_prefix: impl Into<String>, terminal_token: impl Into<String>) -> Self {
        Self {
            pending: Vec::new(),
            header_width: None,
            header_prefix: header_prefix.into(),
            terminal_token: terminal_token.into(),
        }
    }

    /// Width learned from the most recent complete header.
    pub fn header_width(&self) -> Option<usize> {
        self.header_width
    }

    /// Bytes stashed from a trailing partial line.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Consumes one chunk and returns every line it completes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Line>, FrameError> {
        let mut buf = std::mem::take(&mut self.pending);
        buf.extend_from_slice(chunk);

        let mut segments: Vec<&[u8]> = buf.split(|&b| b == b'\n').collect();
        // split always yields at least one segment
        let trailing = segments.pop().unwrap_or_default();

        let mut lines = Vec::new();
        for raw in segments {
            let text = String::from_utf8_lossy(raw);
            let text = text.strip_suffix('\r').unwrap_or(&text);
            if text.trim().is_empty() {
                continue;
            }
            lines.push(self.check_terminated(text)?);
        }

        match std::str::from_utf8(trailing) {
            Ok(text) if !text.trim().is_empty() => match self.check_trailing(text) {
                Completeness::Complete(line) => lines.push(line),
                Completeness::Incomplete => self.pending = trailing.to_vec(),
            },
            Ok(_) => {}
            // a multi-byte character split across chunks
            Err(_) => self.pending = trailing.to_vec(),
        }

        Ok(lines)
    }

    /// Signals the end of one invocation's output.
    ///
    /// A stashed line that is complete is returned; anything else left over
    /// means the output was cut short.
    pub fn finish(&mut self) -> Result<Option<Line>, FrameError> {
        let pending = std::mem::take(&mut self.pending);
        if pending.is_empty() {
            return Ok(None);
        }
        let text = String::from_utf8_lossy(&pending);
        let text = text.strip_suffix('\r').unwrap_or(&text);
        match self.check_trailing(text) {
            Completeness::Complete(line) => Ok(Some(line)),
            Completeness::Incomplete => Err(FrameError::Truncated {
                len: text.chars().count(),
            }),
        }
    }

    /// Drops stashed bytes and the learned width.
    pub fn reset(&mut self) {
        self.pending.clear();
        self.header_width = None;
    }

    fn is_header_candidate(&self, line: &str) -> bool {
        line.trim_start().starts_with(self.header_prefix.as_str())
    }

    fn header_is_complete(&self, line: &str) -> bool {
        line.trim_end().ends_with(self.terminal_token.as_str())
    }

    fn check_terminated(&mut self, line: &str) -> Result<Line, FrameError> {
        if self.is_header_candidate(line) {
            if !self.header_is_complete(line) {
                return Err(FrameError::MalformedHeader {
                    line: line.to_string(),
                });
            }
            self.header_width = Some(line.chars().count());
            return Ok(Line::Header(line.to_string()));
        }

        let Some(expected) = self.header_width else {
            return Err(FrameError::MissingHeader {
                line: line.to_string(),
            });
        };
        let actual = line.chars().count();
        if actual != expected {
            return Err(FrameError::Desync {
                line: line.to_string(),
                expected,
                actual,
            });
        }
        Ok(Line::Data(line.to_string()))
    }

    fn check_trailing(&mut self, line: &str) -> Completeness {
        if self.is_header_candidate(line) {
            if self.header_is_complete(line) {
                self.header_width = Some(line.chars().count());
                return Completeness::Complete(Line::Header(line.to_string()));
            }
            return Completeness::Incomplete;
        }
        match self.header_width {
            Some(width) if line.chars().count() == width => {
                Completeness::Complete(Line::Data(line.to_string()))
            }
            _ => Completeness::Incomplete,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "time            bytes_in   bytes_out";
    const ROW_A: &str = "12:00:01.000000 Safari.101 1024 2048";
    const ROW_B: &str = "12:00:01.000000 curl.20222  512  640";

    fn reassembler() -> StreamReassembler {
        StreamReassembler::new("time", "bytes_out")
    }

    fn fixture() -> String {
        // every line has the header's width
        assert_eq!(ROW_A.len(), HEADER.len());
        assert_eq!(ROW_B.len(), HEADER.len());
        format!("{HEADER}\n{ROW_A}\n{ROW_B}\n")
    }

    fn data(lines: &[Line]) -> Vec<&str> {
        lines
            .iter()
            .filter_map(|l| match l {
                Line::Data(s) => Some(s.as_str()),
                Line::Header(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_single_chunk() {
        let mut r = reassembler();
        let lines = r.feed(fixture().as_bytes()).unwrap();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], Line::Header(HEADER.to_string()));
        assert_eq!(data(&lines), vec![ROW_A, ROW_B]);
        assert_eq!(r.header_width(), Some(HEADER.len()));
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn test_every_split_offset_yields_same_lines() {
        let input = fixture();
        let bytes = input.as_bytes();
        let mut whole = reassembler();
        let expected = whole.feed(bytes).unwrap();

        for cut in 0..=bytes.len() {
            let mut r = reassembler();
            let mut lines = r.feed(&bytes[..cut]).unwrap();
            lines.extend(r.feed(&bytes[cut..]).unwrap());
            assert_eq!(lines, expected, "split at {cut}");
            assert_eq!(r.finish().unwrap(), None, "split at {cut}");
        }
    }

    #[test]
    fn test_byte_by_byte() {
        let input = fixture();
        let mut r = reassembler();
        let mut lines = Vec::new();
        for b in input.as_bytes() {
            lines.extend(r.feed(std::slice::from_ref(b)).unwrap());
        }
        assert_eq!(data(&lines), vec![ROW_A, ROW_B]);
    }

    #[test]
    fn test_trailing_partial_is_stashed() {
        let mut r = reassembler();
        let partial = &ROW_A[..10];
        let lines = r.feed(format!("{HEADER}\n{partial}").as_bytes()).unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(r.pending_len(), partial.len());

        let lines = r.feed(format!("{}\n", &ROW_A[10..]).as_bytes()).unwrap();
        assert_eq!(data(&lines), vec![ROW_A]);
    }

    #[test]
    fn test_trailing_complete_line_without_newline_is_emitted() {
        let mut r = reassembler();
        let lines = r.feed(format!("{HEADER}\n{ROW_A}").as_bytes()).unwrap();
        assert_eq!(data(&lines), vec![ROW_A]);
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn test_short_terminated_line_is_desync() {
        let mut r = reassembler();
        let input = format!("{HEADER}\n{}\n{ROW_B}\n", &ROW_A[..20]);
        let err = r.feed(input.as_bytes()).unwrap_err();
        assert!(matches!(
            err,
            FrameError::Desync { expected, actual: 20, .. } if expected == HEADER.len()
        ));
    }

    #[test]
    fn test_malformed_header_is_desync() {
        let mut r = reassembler();
        let err = r.feed(b"time  bytes_in\n").unwrap_err();
        assert!(matches!(err, FrameError::MalformedHeader { .. }));
    }

    #[test]
    fn test_data_before_header() {
        let mut r = reassembler();
        let err = r.feed(format!("{ROW_A}\n").as_bytes()).unwrap_err();
        assert!(matches!(err, FrameError::MissingHeader { .. }));
    }

    #[test]
    fn test_blank_lines_ignored() {
        let mut r = reassembler();
        let lines = r
            .feed(format!("{HEADER}\n\n{ROW_A}\r\n\n").as_bytes())
            .unwrap();
        assert_eq!(data(&lines), vec![ROW_A]);
    }

    #[test]
    fn test_finish_reports_truncation() {
        let mut r = reassembler();
        r.feed(format!("{HEADER}\n{}", &ROW_A[..5]).as_bytes())
            .unwrap();
        assert_eq!(r.finish(), Err(FrameError::Truncated { len: 5 }));
        assert_eq!(r.pending_len(), 0);
    }

    #[test]
    fn test_split_multibyte_character() {
        let header = "time  bytes_out";
        let row = "12:00 Bär.7 999";
        assert_eq!(row.chars().count(), header.chars().count());
        let input = format!("{header}\n{row}\n");
        let bytes = input.as_bytes();
        // cut inside the two-byte 'ä'
        let cut = header.len() + 1 + "12:00 B".len() + 1;
        let mut r = StreamReassembler::new("time", "bytes_out");
        let mut lines = r.feed(&bytes[..cut]).unwrap();
        lines.extend(r.feed(&bytes[cut..]).unwrap());
        assert_eq!(data(&lines), vec![row]);
    }

    #[test]
    fn test_new_header_changes_width() {
        let mut r = reassembler();
        r.feed(format!("{HEADER}\n").as_bytes()).unwrap();
        let wide = "time                      bytes_in   bytes_out";
        r.feed(format!("{wide}\n").as_bytes()).unwrap();
        assert_eq!(r.header_width(), Some(wide.len()));
        assert!(r.feed(format!("{ROW_A}\n").as_bytes()).is_err());
    }
}
