//! Reference-counted copy-on-write byte buffers.

use crate::list::List;
use crate::string::CmmString;
use crate::value::Value;
use std::sync::Arc;

/// A shared byte buffer with clone-on-shared mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Buffer(Arc<Vec<u8>>);

impl Buffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Buffer(Arc::new(bytes.to_vec()))
    }

    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Buffer(Arc::new(bytes))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Number of holders sharing the backing storage.
    pub fn refs(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// Byte at `pos`; caller has range-checked.
    pub fn retrieve(&self, pos: usize) -> u8 {
        self.0[pos]
    }

    /// Appends the contents of `other`.
    pub fn append(&mut self, other: &Buffer) {
        if other.is_empty() {
            return;
        }
        Arc::make_mut(&mut self.0).extend_from_slice(other.as_bytes());
    }

    /// Appends a single octet (the low eight bits of `c`).
    pub fn add(&mut self, c: i64) {
        Arc::make_mut(&mut self.0).push(c as u8);
    }

    /// Appends raw bytes.
    pub fn add_bytes(&mut self, bytes: &[u8]) {
        Arc::make_mut(&mut self.0).extend_from_slice(bytes);
    }

    /// Replaces the byte at `pos`; caller has range-checked.
    pub fn replace(&mut self, pos: usize, c: i64) {
        if self.0[pos] == c as u8 {
            return;
        }
        Arc::make_mut(&mut self.0)[pos] = c as u8;
    }

    /// Truncates to `len` bytes when `len` is non-negative; a negative `len`
    /// trims `-len` bytes from the front. Caller has checked `|len| < self
    /// .len()`.
    pub fn truncate(&mut self, len: i64) {
        if len >= 0 {
            let len = len as usize;
            if len == self.0.len() {
                return;
            }
            Arc::make_mut(&mut self.0).truncate(len);
        } else {
            let trim = (-len) as usize;
            let bytes = Arc::make_mut(&mut self.0);
            bytes.drain(..trim);
        }
    }

    /// Splits on `sep` into a list of strings plus a trailing buffer holding
    /// the unterminated remainder. Non-printable bytes are dropped from the
    /// string segments. `None` separates on `\n`. An empty separator yields
    /// a single string of every printable byte.
    pub fn to_strings(&self, sep: Option<&Buffer>) -> List {
        let bytes = self.as_bytes();
        let sep_bytes: &[u8] = match sep {
            Some(s) => s.as_bytes(),
            None => b"\n",
        };
        let mut result = List::new();

        if sep_bytes.is_empty() {
            let text: String = bytes
                .iter()
                .filter(|b| b.is_ascii_graphic() || **b == b' ')
                .map(|&b| b as char)
                .collect();
            result.add(Value::Str(CmmString::from(text)));
            return result;
        }

        let mut start = 0;
        while start + sep_bytes.len() <= bytes.len() {
            let window = &bytes[start..];
            let hit = match find_subslice(window, sep_bytes) {
                Some(at) => start + at,
                None => break,
            };
            let text: String = bytes[start..hit]
                .iter()
                .filter(|b| b.is_ascii_graphic() || **b == b' ')
                .map(|&b| b as char)
                .collect();
            result.add(Value::Str(CmmString::from(text)));
            start = hit + sep_bytes.len();
        }

        result.add(Value::Buffer(Buffer::from_bytes(&bytes[start..])));
        result
    }

    /// Joins a list of strings into a buffer with `sep` after each element;
    /// `None` joins with `\r\n`. Caller has checked the list holds strings.
    pub fn from_strings(strings: &List, sep: Option<&Buffer>) -> Buffer {
        let sep_bytes: &[u8] = match sep {
            Some(s) => s.as_bytes(),
            None => b"\r\n",
        };
        let mut out = Vec::new();
        for v in strings.iter() {
            if let Value::Str(s) = v {
                out.extend_from_slice(s.as_str().as_bytes());
            }
            out.extend_from_slice(sep_bytes);
        }
        Buffer(Arc::new(out))
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_and_truncate() {
        let mut buf = Buffer::from_bytes(b"abc");
        buf.append(&Buffer::from_bytes(b"def"));
        assert_eq!(buf.as_bytes(), b"abcdef");
        buf.truncate(4);
        assert_eq!(buf.as_bytes(), b"abcd");
        buf.truncate(-2);
        assert_eq!(buf.as_bytes(), b"cd");
    }

    #[test]
    fn shared_buffers_copy_on_write() {
        let mut a = Buffer::from_bytes(b"xyz");
        let b = a.clone();
        a.replace(0, b'X' as i64);
        assert_eq!(a.as_bytes(), b"Xyz");
        assert_eq!(b.as_bytes(), b"xyz");
    }

    #[test]
    fn to_strings_keeps_unterminated_tail() {
        let buf = Buffer::from_bytes(b"one\ntwo\nrest");
        let list = buf.to_strings(None);
        assert_eq!(list.len(), 3);
        assert_eq!(list.get(0), &Value::Str("one".into()));
        assert_eq!(list.get(1), &Value::Str("two".into()));
        assert_eq!(list.get(2), &Value::Buffer(Buffer::from_bytes(b"rest")));
    }

    #[test]
    fn empty_separator_collapses_to_printable_string() {
        let buf = Buffer::from_bytes(b"a\x01b c\xff");
        let list = buf.to_strings(Some(&Buffer::new()));
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(0), &Value::Str("ab c".into()));
    }

    #[test]
    fn round_trip_through_strings() {
        let buf = Buffer::from_bytes(b"alpha\nbeta\ngamma");
        let sep = Buffer::from_bytes(b"\n");
        let lines = buf.to_strings(Some(&sep));
        // Trailing element is the unterminated remainder buffer; a join of
        // the string elements plus that tail reconstructs the original.
        let strings = {
            let mut l = List::new();
            for v in lines.iter().take(lines.len() - 1) {
                l.add(v.clone());
            }
            l
        };
        let mut joined = Buffer::from_strings(&strings, Some(&sep));
        if let Value::Buffer(tail) = lines.get(lines.len() - 1) {
            joined.append(tail);
        }
        // Joining re-adds the final separator that to_strings consumed.
        assert_eq!(&joined.as_bytes()[..buf.len()], buf.as_bytes());
    }
}
