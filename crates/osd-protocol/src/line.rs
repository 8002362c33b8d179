//! Reassembly of newline-delimited records from a chunked byte stream.
//!
//! The transport hands over body bytes in whatever pieces the network
//! produced. `LineAssembler` keeps the bytes that do not yet form a full
//! line and yields complete lines in order, without their terminator.

/// Line terminator used by the stream.
const TERMINATOR: u8 = b'\n';

/// Accumulates raw bytes and splits off complete lines.
///
/// The pending buffer is unbounded: a partial line waits for as long as it
/// takes for its terminator to arrive.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: Vec<u8>,

    /// Prefix of `pending` already known to contain no terminator.
    scanned: usize,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a received chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Removes and returns the next complete line, if any.
    ///
    /// The terminator is consumed but not included in the result.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        let offset = self
            .pending
            .get(self.scanned..)?
            .iter()
            .position(|&b| b == TERMINATOR);

        let Some(offset) = offset else {
            self.scanned = self.pending.len();
            return None;
        };

        let end = self.scanned + offset;
        let mut line: Vec<u8> = self.pending.drain(..=end).collect();
        line.pop();
        self.scanned = 0;
        Some(line)
    }

    /// Appends `chunk` and iterates over the lines it completed.
    pub fn feed<'a>(&'a mut self, chunk: &[u8]) -> Lines<'a> {
        self.push(chunk);
        Lines { assembler: self }
    }

    /// Bytes received but not yet part of a complete line.
    pub fn pending(&self) -> &[u8] {
        &self.pending
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Iterator over the complete lines currently buffered.
pub struct Lines<'a> {
    assembler: &'a mut LineAssembler,
}

impl Iterator for Lines<'_> {
    type Item = Vec<u8>;

    fn next(&mut self) -> Option<Self::Item> {
        self.assembler.next_line()
    }
}
