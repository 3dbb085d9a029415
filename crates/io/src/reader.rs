//! A positioned reader over an in-memory image.

use crate::error::{IoError, IoResult};
use crate::varint;

/// Reads varint integers, length-prefixed strings, and raw bytes from a
/// byte slice, tracking its position.
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    /// Current byte position.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Bytes left to read.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Reads one varint integer.
    pub fn read_int(&mut self) -> IoResult<i64> {
        varint::read(self.data, &mut self.pos)
    }

    /// Reads a varint and checks it fits `usize` under `limit`.
    pub fn read_len(&mut self, limit: usize, context: &'static str) -> IoResult<usize> {
        let len = self.read_int()?;
        if len < 0 || len as usize > limit {
            return Err(IoError::InvalidLength { len, context });
        }
        Ok(len as usize)
    }

    /// Reads `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize, context: &'static str) -> IoResult<&'a [u8]> {
        let bytes = self
            .data
            .get(self.pos..self.pos + n)
            .ok_or(IoError::EndOfStream { needed: n, context })?;
        self.pos += n;
        Ok(bytes)
    }

    /// Reads a length-prefixed string; a length of -1 is the absent
    /// sentinel.
    pub fn read_str(&mut self, context: &'static str) -> IoResult<Option<String>> {
        let len = self.read_int()?;
        if len == -1 {
            return Ok(None);
        }
        if len < 0 {
            return Err(IoError::InvalidLength { len, context });
        }
        let bytes = self.read_bytes(len as usize, context)?;
        let s = std::str::from_utf8(bytes).map_err(|_| IoError::Utf8 { context })?;
        Ok(Some(s.to_owned()))
    }

    /// Reads an identifier: like [`read_str`], with -1 marking a blank
    /// table slot.
    pub fn read_ident(&mut self) -> IoResult<Option<String>> {
        self.read_str("ident")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::writer::Writer;

    #[test]
    fn reads_back_what_the_writer_wrote() {
        let mut w = Writer::new();
        w.write_int(42);
        w.write_str(Some("hello"));
        w.write_str(None);
        w.write_int(-7);
        let image = w.into_vec();

        let mut r = Reader::new(&image);
        assert_eq!(r.read_int().expect("int"), 42);
        assert_eq!(r.read_str("s").expect("str"), Some("hello".to_owned()));
        assert_eq!(r.read_str("s").expect("str"), None);
        assert_eq!(r.read_int().expect("int"), -7);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn rejects_lying_length_prefixes() {
        let mut w = Writer::new();
        w.write_int(100);
        let image = w.into_vec();
        let mut r = Reader::new(&image);
        assert!(r.read_str("s").is_err());
    }
}
