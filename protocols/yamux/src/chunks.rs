use std::collections::VecDeque;
use std::io;

/// The receive buffer of a stream: an ordered queue of byte chunks, each
/// consumed from the front.
#[derive(Debug)]
pub(crate) struct Chunks {
    seq: VecDeque<Chunk>,
    len: usize,
}

impl Chunks {
    pub(crate) fn new() -> Self {
        Chunks { seq: VecDeque::new(), len: 0 }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total number of unread bytes across all chunks.
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    /// Appends a chunk of bytes at the end.
    pub(crate) fn push(&mut self, bytes: Vec<u8>) {
        if !bytes.is_empty() {
            self.len += bytes.len();
            self.seq.push_back(Chunk {
                cursor: io::Cursor::new(bytes),
            })
        }
    }

    /// Copies up to `buf.len()` bytes into `buf`, consuming them.
    pub(crate) fn consume(&mut self, buf: &mut [u8]) -> usize {
        let mut n = 0;
        while n < buf.len() {
            match self.seq.front_mut() {
                Some(chunk) if chunk.is_empty() => {
                    self.seq.pop_front();
                }
                Some(chunk) => {
                    let k = std::cmp::min(chunk.len(), buf.len() - n);
                    buf[n..n + k].copy_from_slice(&chunk.as_ref()[..k]);
                    chunk.advance(k);
                    n += k;
                }
                None => break,
            }
        }
        self.len -= n;
        n
    }

    /// Discards all buffered bytes.
    pub(crate) fn clear(&mut self) {
        self.seq.clear();
        self.len = 0;
    }
}

/// A chunk wraps a `std::io::Cursor<Vec<u8>>`, viewing the not yet
/// consumed tail of the vector.
#[derive(Debug)]
struct Chunk {
    cursor: io::Cursor<Vec<u8>>,
}

impl Chunk {
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn len(&self) -> usize {
        self.cursor.get_ref().len() - self.cursor.position() as usize
    }

    fn advance(&mut self, amount: usize) {
        debug_assert!(self.cursor.position() as usize + amount <= self.cursor.get_ref().len());
        self.cursor.set_position(self.cursor.position() + amount as u64);
    }
}

impl AsRef<[u8]> for Chunk {
    fn as_ref(&self) -> &[u8] {
        &self.cursor.get_ref()[self.cursor.position() as usize..]
    }
}
