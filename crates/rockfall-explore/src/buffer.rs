//! Named, owned byte blobs: the unit of input the engine mutates.
//!
//! A [`FileBuffer`] is one target input file (or one captured socket
//! message) held in memory.  The buffer knows how to rewrite itself
//! from a solver counterexample, how to reduce checker output to a
//! crash fingerprint, and how to split a path-condition trace into
//! per-branch solver queries.

use std::fs;
use std::io::Write;
use std::path::Path;

use thiserror::Error;

/// The record that terminates each per-branch query in a trace.
const QUERY_MARKER: &str = "QUERY(FALSE);";

/// Errors from buffer I/O.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// A named, owned, growable byte buffer.
///
/// For file targets the name is the target file path; for network
/// targets the name is a stable encoding of the message index (see
/// [`FileBuffer::socket`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileBuffer {
    name: String,
    data: Vec<u8>,
}

impl FileBuffer {
    /// Create a buffer from raw parts.
    pub fn new(name: impl Into<String>, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data,
        }
    }

    /// A socket-message buffer: name fixed to `socket_<index>`,
    /// contents zero-filled to `size`.
    pub fn socket(index: usize, size: usize) -> Self {
        Self {
            name: format!("socket_{index}"),
            data: vec![0; size],
        }
    }

    /// Read a file into a buffer named after its path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BufferError> {
        let path = path.as_ref();
        let data = fs::read(path).map_err(|source| BufferError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self {
            name: path.to_string_lossy().into_owned(),
            data,
        })
    }

    /// Atomically overwrite `path` with the buffer contents (write to
    /// a sibling temp file, then rename).
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<(), BufferError> {
        let path = path.as_ref();
        let io_err = |source| BufferError::Io {
            path: path.display().to_string(),
            source,
        };
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let mut tmp = match dir {
            Some(dir) => tempfile::NamedTempFile::new_in(dir),
            None => tempfile::NamedTempFile::new_in("."),
        }
        .map_err(io_err)?;
        tmp.write_all(&self.data).map_err(io_err)?;
        tmp.persist(path).map_err(|e| io_err(e.error))?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Grow the buffer to `size` bytes, zero-filling the tail.  Used
    /// when the tracer captures a longer message than the one we sent.
    pub fn grow_to(&mut self, size: usize) {
        if size > self.data.len() {
            self.data.resize(size, 0);
        }
    }

    /// Replace the leading bytes of the buffer.
    pub fn overwrite(&mut self, data: &[u8]) {
        self.grow_to(data.len());
        self.data[..data.len()].copy_from_slice(data);
    }

    /// Rewrite bytes per a solver counterexample.
    ///
    /// Each model line of the form `ASSERT( file_<k>_<offset> = 0hXX );`
    /// overwrites byte `offset` of blob `k`.  Returns the rewritten
    /// buffer when at least one byte of *this* blob (`blob_index`) was
    /// touched, and `None` ("no change") otherwise — the caller treats
    /// no-change as pruning the branch.  Offsets past the end of the
    /// buffer are ignored; length is always preserved.
    pub fn apply_model(&self, model: &str, blob_index: usize) -> Option<FileBuffer> {
        let mut next = self.clone();
        let mut changed = false;
        for line in model.lines() {
            let Some((k, offset, value)) = parse_model_line(line) else {
                continue;
            };
            if k != blob_index {
                continue;
            }
            if offset < next.data.len() {
                next.data[offset] = value;
                changed = true;
            }
        }
        changed.then_some(next)
    }

    /// Strip the execution-framework preamble from checker output,
    /// keeping only call-stack frames.  This is the canonical crash
    /// fingerprint: two crashes belong to the same group iff their
    /// filtered outputs are byte-equal.  Idempotent.  Returns whether
    /// any stack frame survived.
    pub fn filter_checker_output(&mut self) -> bool {
        let text = String::from_utf8_lossy(&self.data);
        let mut kept = String::new();
        for line in text.lines() {
            let frame = strip_pid_prefix(line).trim_start();
            if frame.starts_with("at 0x") || frame.starts_with("by 0x") {
                kept.push_str(frame);
                kept.push('\n');
            }
        }
        self.data = kept.into_bytes();
        !self.data.is_empty()
    }

    /// Split off the first `QUERY(FALSE);` record, together with all
    /// preceding declarations, into `path`.
    ///
    /// When `keep_remainder` is set the in-memory buffer advances past
    /// that query — the negated-condition `ASSERT` immediately before
    /// the marker and the marker itself are removed, declarations
    /// stay — so the next call yields the next query.  Returns whether
    /// a query was found.
    pub fn cut_query_and_dump(
        &mut self,
        path: impl AsRef<Path>,
        keep_remainder: bool,
    ) -> Result<bool, BufferError> {
        let text = String::from_utf8_lossy(&self.data).into_owned();
        let Some(marker) = text.find(QUERY_MARKER) else {
            return Ok(false);
        };
        let mut end = marker + QUERY_MARKER.len();
        if text[end..].starts_with('\n') {
            end += 1;
        }

        FileBuffer::new(self.name.clone(), text[..end].into()).dump(&path)?;

        if keep_remainder {
            // The query record starts at the ASSERT that negates the
            // branch condition; everything before it is declarations
            // shared by the remaining queries.
            let cut_from = text[..marker]
                .rfind("ASSERT")
                .map(|a| text[..a].rfind('\n').map_or(0, |nl| nl + 1))
                .unwrap_or(marker);
            let mut rest = String::with_capacity(text.len() - (end - cut_from));
            rest.push_str(&text[..cut_from]);
            rest.push_str(&text[end..]);
            self.data = rest.into_bytes();
        }
        Ok(true)
    }

    /// Number of `QUERY(FALSE);` records currently in the buffer.
    pub fn count_queries(&self) -> usize {
        let text = String::from_utf8_lossy(&self.data);
        let mut count = 0;
        let mut at = 0;
        while let Some(pos) = text[at..].find(QUERY_MARKER) {
            count += 1;
            at += pos + 1;
        }
        count
    }
}

/// Parse one model line: `ASSERT( file_<k>_<offset> = 0hXX );`.
fn parse_model_line(line: &str) -> Option<(usize, usize, u8)> {
    let rest = line.trim_start().strip_prefix("ASSERT(")?.trim_start();
    let rest = rest.strip_prefix("file_")?;
    let us = rest.find('_')?;
    let k: usize = rest[..us].parse().ok()?;
    let rest = &rest[us + 1..];
    let end = rest.find(|c: char| !c.is_ascii_digit())?;
    let offset: usize = rest[..end].parse().ok()?;
    let rest = rest[end..].trim_start().strip_prefix('=')?.trim_start();
    let rest = rest.strip_prefix("0h")?;
    let hex_end = rest
        .find(|c: char| !c.is_ascii_hexdigit())
        .unwrap_or(rest.len());
    if hex_end == 0 {
        return None;
    }
    let value = u8::from_str_radix(&rest[hex_end.saturating_sub(2)..hex_end], 16).ok()?;
    Some((k, offset, value))
}

/// Drop a `==pid==` prefix from a valgrind output line.
fn strip_pid_prefix(line: &str) -> &str {
    let trimmed = line.trim_start();
    if let Some(rest) = trimmed.strip_prefix("==") {
        if let Some(close) = rest.find("==") {
            if rest[..close].chars().all(|c| c.is_ascii_digit()) && close > 0 {
                return &rest[close + 2..];
            }
        }
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn load_dump_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("input.bin");
        fs::write(&path, b"hello").unwrap();

        let buf = FileBuffer::load(&path).unwrap();
        assert_eq!(buf.data(), b"hello");

        let out = dir.path().join("copy.bin");
        buf.dump(&out).unwrap();
        assert_eq!(fs::read(out).unwrap(), b"hello");
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(FileBuffer::load("/nonexistent/rockfall-test").is_err());
    }

    #[test]
    fn socket_buffer_name_encodes_index() {
        let buf = FileBuffer::socket(3, 16);
        assert_eq!(buf.name(), "socket_3");
        assert_eq!(buf.len(), 16);
        assert!(buf.data().iter().all(|&b| b == 0));
    }

    #[test]
    fn apply_model_rewrites_named_bytes() {
        let buf = FileBuffer::new("input", b"hello".to_vec());
        let model = "ASSERT( file_0_0 = 0h00 );\nASSERT( file_0_4 = 0hFF );\n";
        let next = buf.apply_model(model, 0).unwrap();
        assert_eq!(next.data(), b"\x00ell\xFF");
        // Untouched bytes and length are preserved.
        assert_eq!(next.len(), buf.len());
        assert_eq!(&next.data()[1..4], &buf.data()[1..4]);
    }

    #[test]
    fn apply_model_ignores_other_blobs() {
        let buf = FileBuffer::new("input", b"abc".to_vec());
        let model = "ASSERT( file_1_0 = 0h41 );\n";
        assert!(buf.apply_model(model, 0).is_none());
        let next = buf.apply_model(model, 1).unwrap();
        assert_eq!(next.data(), b"Abc");
    }

    #[test]
    fn apply_model_no_reference_is_no_change() {
        let buf = FileBuffer::new("input", b"abc".to_vec());
        assert!(buf.apply_model("Valid.\n", 0).is_none());
        assert!(buf.apply_model("", 0).is_none());
    }

    #[test]
    fn apply_model_out_of_range_offset_ignored() {
        let buf = FileBuffer::new("input", b"ab".to_vec());
        let model = "ASSERT( file_0_9 = 0h41 );\n";
        assert!(buf.apply_model(model, 0).is_none());

        let model = "ASSERT( file_0_9 = 0h41 );\nASSERT( file_0_1 = 0h42 );\n";
        let next = buf.apply_model(model, 0).unwrap();
        assert_eq!(next.data(), b"aB");
    }

    #[test]
    fn model_line_parsing() {
        assert_eq!(
            parse_model_line("ASSERT( file_2_17 = 0h7F );"),
            Some((2, 17, 0x7F))
        );
        assert_eq!(parse_model_line("ASSERT( file_0_0 = 0h0 );"), Some((0, 0, 0)));
        assert_eq!(parse_model_line("QUERY(FALSE);"), None);
        assert_eq!(parse_model_line("sat"), None);
    }

    #[test]
    fn filter_checker_output_keeps_frames() {
        let raw = b"==1234== Memcheck, a memory error detector\n\
                    ==1234== Invalid read of size 4\n\
                    ==1234==    at 0x401234: parse (main.c:10)\n\
                    ==1234==    by 0x401300: main (main.c:55)\n\
                    ==1234== Address 0x0 is not stack'd\n"
            .to_vec();
        let mut buf = FileBuffer::new("execution.log", raw);
        assert!(buf.filter_checker_output());
        assert_eq!(
            buf.data(),
            b"at 0x401234: parse (main.c:10)\nby 0x401300: main (main.c:55)\n"
        );
    }

    #[test]
    fn filter_checker_output_is_idempotent() {
        let raw = b"==7== banner\n==7==    at 0x1: f (a.c:1)\n".to_vec();
        let mut buf = FileBuffer::new("log", raw);
        buf.filter_checker_output();
        let once = buf.data().to_vec();
        buf.filter_checker_output();
        assert_eq!(buf.data(), once.as_slice());
    }

    #[test]
    fn filter_checker_output_empty_when_no_frames() {
        let mut buf = FileBuffer::new("log", b"==9== no stack here\n".to_vec());
        assert!(!buf.filter_checker_output());
        assert!(buf.is_empty());
    }

    fn sample_trace() -> FileBuffer {
        let text = "x0 : BITVECTOR(8);\n\
                    x1 : BITVECTOR(8);\n\
                    ASSERT( x0 = 0h68 );\nQUERY(FALSE);\n\
                    ASSERT( x1 = 0h65 );\nQUERY(FALSE);\n\
                    ASSERT( x0 = 0h6C );\nQUERY(FALSE);\n";
        FileBuffer::new("trace.log", text.as_bytes().to_vec())
    }

    #[test]
    fn count_queries_counts_markers() {
        assert_eq!(sample_trace().count_queries(), 3);
        assert_eq!(FileBuffer::new("t", Vec::new()).count_queries(), 0);
    }

    #[test]
    fn cut_query_produces_one_file_per_query_in_order() {
        let dir = TempDir::new().unwrap();
        let mut trace = sample_trace();

        let mut files = Vec::new();
        for i in 0..3 {
            let path = dir.path().join(format!("curtrace_{i}.log"));
            assert!(trace.cut_query_and_dump(&path, true).unwrap());
            files.push(fs::read_to_string(path).unwrap());
        }
        // No fourth query.
        let leftover = dir.path().join("none.log");
        assert!(!trace.cut_query_and_dump(&leftover, true).unwrap());

        for (i, content) in files.iter().enumerate() {
            // Declarations are present in every file, and exactly one
            // query marker.
            assert!(content.starts_with("x0 : BITVECTOR(8);\n"), "file {i}");
            assert_eq!(content.matches(QUERY_MARKER).count(), 1, "file {i}");
        }
        // Queries appear in input order.
        assert!(files[0].contains("ASSERT( x0 = 0h68 );"));
        assert!(files[1].contains("ASSERT( x1 = 0h65 );"));
        assert!(files[2].contains("ASSERT( x0 = 0h6C );"));
        // The negated conjunct of an earlier query is not replayed in
        // a later one.
        assert!(!files[1].contains("ASSERT( x0 = 0h68 );"));
    }

    #[test]
    fn cut_query_without_keep_remainder_repeats() {
        let dir = TempDir::new().unwrap();
        let mut trace = sample_trace();

        let a = dir.path().join("a.log");
        let b = dir.path().join("b.log");
        trace.cut_query_and_dump(&a, false).unwrap();
        trace.cut_query_and_dump(&b, false).unwrap();
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
        assert_eq!(trace.count_queries(), 3);
    }

    #[test]
    fn grow_and_overwrite() {
        let mut buf = FileBuffer::socket(0, 2);
        buf.overwrite(b"abcd");
        assert_eq!(buf.data(), b"abcd");
        buf.grow_to(6);
        assert_eq!(buf.data(), b"abcd\x00\x00");
        buf.grow_to(3);
        assert_eq!(buf.len(), 6);
    }
}
