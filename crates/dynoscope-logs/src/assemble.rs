//! Partial-line buffering across chunk boundaries.
//!
//! The log transport hands over arbitrary byte chunks; a line may be split
//! anywhere, including inside a multi-byte UTF-8 sequence. The carry is kept
//! as raw bytes so a split sequence is reassembled before decoding; only
//! complete lines are ever decoded.

/// Split a carry plus a new chunk into complete lines and the new carry.
///
/// Lines are terminated by `\n`; a trailing `\r` is stripped. If the chunk
/// does not end in a newline, the trailing fragment becomes the new carry
/// and is not returned. An empty chunk yields no lines and an unchanged
/// carry; a chunk of just `"\n"` flushes the carry as one line.
pub fn split_lines(carry: &[u8], chunk: &[u8]) -> (Vec<String>, Vec<u8>) {
    if chunk.is_empty() {
        return (Vec::new(), carry.to_vec());
    }

    let mut buf = Vec::with_capacity(carry.len() + chunk.len());
    buf.extend_from_slice(carry);
    buf.extend_from_slice(chunk);

    let mut lines = Vec::new();
    let mut start = 0;
    while let Some(offset) = buf[start..].iter().position(|&b| b == b'\n') {
        let mut end = start + offset;
        if end > start && buf[end - 1] == b'\r' {
            end -= 1;
        }
        lines.push(String::from_utf8_lossy(&buf[start..end]).into_owned());
        start += offset + 1;
    }

    (lines, buf[start..].to_vec())
}

/// Stateful wrapper owning the carry for one stream.
///
/// One assembler per application stream; never shared across streams.
#[derive(Debug, Default)]
pub struct LineAssembler {
    carry: Vec<u8>,
}

impl LineAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the complete lines it closed out
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        let (lines, carry) = split_lines(&self.carry, chunk);
        self.carry = carry;
        lines
    }

    /// The buffered incomplete fragment, if any
    pub fn carry(&self) -> &[u8] {
        &self.carry
    }
}
