/// Accumulates body bytes up to a declared size. Never holds more than one
/// frame's worth of bytes — excess is the caller's problem (see
/// `RequestReader`'s frame boundary carry-over).
#[derive(Debug)]
pub struct BodyReader {
    buf: Vec<u8>,
    size: u32,
    have: u32,
}

impl BodyReader {
    pub fn new(max_body_bytes: u32) -> Self {
        Self { buf: vec![0u8; max_body_bytes as usize], size: 0, have: 0 }
    }

    /// Declares this frame's body length and resets the fill counter.
    pub fn set_size(&mut self, size: u32) {
        debug_assert!(size as usize <= self.buf.len());
        self.size = size;
        self.have = 0;
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.have == self.size
    }

    pub fn reset(&mut self) {
        self.size = 0;
        self.have = 0;
    }

    /// The slice a vectored read should target next: the unfilled tail of
    /// the declared body. Empty once `is_complete()`.
    #[inline]
    pub fn tail_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.have as usize..self.size as usize]
    }

    /// The entire backing buffer, used as the scatter-read overflow target
    /// while the header for the *next* frame is still being assembled and
    /// `size` is not yet meaningful.
    #[inline]
    pub fn overflow_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..]
    }

    pub fn mark_filled(&mut self, n: usize) {
        self.have += n as u32;
        debug_assert!(self.have <= self.size);
    }

    /// Copies as many bytes of `bytes` as fit into the remaining declared
    /// size. Returns the number consumed.
    pub fn feed(&mut self, bytes: &[u8]) -> usize {
        let remaining = (self.size - self.have) as usize;
        let n = bytes.len().min(remaining);
        let start = self.have as usize;
        self.buf[start..start + n].copy_from_slice(&bytes[..n]);
        self.have += n as u32;
        n
    }

    /// The completed body slice. Only meaningful once `is_complete()`.
    pub fn body(&self) -> &[u8] {
        &self.buf[..self.size as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_up_to_declared_size() {
        let mut b = BodyReader::new(16);
        b.set_size(5);
        assert_eq!(b.feed(b"abc"), 3);
        assert!(!b.is_complete());
        assert_eq!(b.feed(b"defgh"), 2);
        assert!(b.is_complete());
        assert_eq!(b.body(), b"abcde");
    }

    #[test]
    fn feed_never_overruns_declared_size() {
        let mut b = BodyReader::new(16);
        b.set_size(2);
        assert_eq!(b.feed(b"xyz"), 2);
        assert!(b.is_complete());
        assert_eq!(b.body(), b"xy");
    }
}
