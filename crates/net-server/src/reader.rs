use std::io::{self, IoSliceMut, Read};
use std::sync::Arc;

use crate::error::{Result, ServerError};
use crate::frame::{BodyReader, HeaderReader};
use crate::handler::{Message, MessageFactory};

/// Which half of a frame is currently being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Header,
    Body,
}

/// Stitches length-prefixed frames out of a byte stream delivered in
/// arbitrary TCP segment boundaries.
///
/// Owns two fixed-size buffers for the lifetime of the connection (no
/// per-frame allocation on the hot path, beyond the `Vec` returned for a
/// decoded message's raw bytes). Drives a single `read_vectored` call per
/// wake whenever both the header and the body tail can be targeted at
/// once, matching the "scatter read" behaviour described for this engine.
pub struct RequestReader<F: MessageFactory> {
    header: HeaderReader,
    body: BodyReader,
    phase: Phase,
    max_body_bytes: u32,
    end_of_stream: bool,
    factory: Arc<F>,
}

impl<F: MessageFactory> RequestReader<F> {
    pub fn new(header_size: u8, max_body_bytes: u32, factory: Arc<F>) -> Self {
        Self {
            header: HeaderReader::new(header_size),
            body: BodyReader::new(max_body_bytes),
            phase: Phase::Header,
            max_body_bytes,
            end_of_stream: false,
            factory,
        }
    }

    pub fn end_of_stream(&self) -> bool {
        self.end_of_stream
    }

    /// Drains everything currently readable on `stream`, decoding as many
    /// complete frames as have arrived and invoking `on_message` for each,
    /// in order. Returns once the socket would block.
    pub fn read(
        &mut self,
        stream: &mut impl Read,
        on_message: &mut impl FnMut(Message<F::Value>) -> Result<()>,
    ) -> Result<()> {
        loop {
            let n = match self.read_vectored_once(stream) {
                Ok(0) => {
                    self.end_of_stream = true;
                    return Err(ServerError::EndOfStream);
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.end_of_stream = true;
                    return Err(ServerError::IoFailure(e));
                }
            };
            self.distribute(n, on_message)?;
        }
    }

    /// One `read_vectored` syscall, targeting whichever buffers are
    /// currently incomplete, and reporting the raw byte count the kernel
    /// delivered (not yet attributed to header vs. body — see
    /// `distribute`).
    fn read_vectored_once(&mut self, stream: &mut impl Read) -> io::Result<usize> {
        if self.phase == Phase::Header {
            let mut bufs =
                [IoSliceMut::new(self.header.tail_mut()), IoSliceMut::new(self.body.overflow_mut())];
            stream.read_vectored(&mut bufs)
        } else {
            let mut bufs = [IoSliceMut::new(self.body.tail_mut())];
            stream.read_vectored(&mut bufs)
        }
    }

    /// Attributes `n` freshly-read bytes to the header/body buffers they
    /// physically landed in, completing as many frames as the data allows
    /// and carrying any surplus (the start of subsequent frames coalesced
    /// into the same read) forward via `feed_leftover`.
    fn distribute(
        &mut self,
        n: usize,
        on_message: &mut impl FnMut(Message<F::Value>) -> Result<()>,
    ) -> Result<()> {
        if self.phase == Phase::Body {
            self.body.mark_filled(n);
            if self.body.is_complete() {
                self.complete_frame(on_message)?;
            }
            return Ok(());
        }

        let header_cap = self.header.remaining() as usize;
        let n0 = n.min(header_cap);
        self.header.mark_filled(n0);
        let n1 = n - n0;

        if !self.header.is_complete() {
            debug_assert_eq!(n1, 0, "vectored read must not touch the 2nd buffer before the 1st is full");
            return Ok(());
        }

        let declared = self.header.value();
        if declared > self.max_body_bytes {
            return Err(ServerError::MalformedFrame { declared, max: self.max_body_bytes });
        }
        self.body.set_size(declared);
        self.phase = Phase::Body;

        let used = n1.min(declared as usize);
        self.body.mark_filled(used);

        if !self.body.is_complete() {
            return Ok(());
        }

        // The remaining `n1 - used` bytes, if any, are already the start of
        // one or more subsequent frames, coalesced into this same read.
        let leftover = if n1 > used { self.body.overflow_mut()[used..n1].to_vec() } else { Vec::new() };
        self.complete_frame(on_message)?;
        if !leftover.is_empty() {
            self.feed_leftover(&leftover, on_message)?;
        }
        Ok(())
    }

    fn complete_frame(
        &mut self,
        on_message: &mut impl FnMut(Message<F::Value>) -> Result<()>,
    ) -> Result<()> {
        let raw = self.body.body().to_vec();
        let value = self.factory.create(&raw).map_err(ServerError::CodecError)?;
        self.header.reset();
        self.body.reset();
        self.phase = Phase::Header;
        on_message(Message { value, raw })
    }

    /// Feeds bytes that are already in memory (not freshly read from the
    /// socket) through the same header/body state machine, completing
    /// however many whole frames they contain. Used both for surplus bytes
    /// carried over from a coalesced read and, in tests, to exercise the
    /// decoder without a real socket.
    fn feed_leftover(
        &mut self,
        mut bytes: &[u8],
        on_message: &mut impl FnMut(Message<F::Value>) -> Result<()>,
    ) -> Result<()> {
        while !bytes.is_empty() {
            if self.phase == Phase::Header {
                let consumed = self.header.feed(bytes);
                bytes = &bytes[consumed..];
                if !self.header.is_complete() {
                    break;
                }
                let declared = self.header.value();
                if declared > self.max_body_bytes {
                    return Err(ServerError::MalformedFrame { declared, max: self.max_body_bytes });
                }
                self.body.set_size(declared);
                self.phase = Phase::Body;
            } else {
                let consumed = self.body.feed(bytes);
                bytes = &bytes[consumed..];
                if !self.body.is_complete() {
                    break;
                }
                self.complete_frame(on_message)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoFactory;
    impl MessageFactory for EchoFactory {
        type Value = Vec<u8>;
        fn create(&self, body: &[u8]) -> std::result::Result<Vec<u8>, crate::handler::CodecError> {
            Ok(body.to_vec())
        }
    }

    fn reader() -> RequestReader<EchoFactory> {
        RequestReader::new(4, 1024, Arc::new(EchoFactory))
    }

    #[test]
    fn single_frame_via_feed_leftover() {
        let mut r = reader();
        let mut out = Vec::new();
        r.feed_leftover(b"\x00\x00\x00\x05hello", &mut |m| {
            out.push(m.value);
            Ok(())
        })
        .unwrap();
        assert_eq!(out, vec![b"hello".to_vec()]);
    }

    #[test]
    fn split_header_across_two_feeds() {
        let mut r = reader();
        let mut out = Vec::new();
        r.feed_leftover(b"\x00\x00", &mut |m| {
            out.push(m.value);
            Ok(())
        })
        .unwrap();
        assert!(out.is_empty());
        r.feed_leftover(b"\x00\x05abcde", &mut |m| {
            out.push(m.value);
            Ok(())
        })
        .unwrap();
        assert_eq!(out, vec![b"abcde".to_vec()]);
    }

    #[test]
    fn coalesced_frames_in_one_feed() {
        let mut r = reader();
        let mut out = Vec::new();
        r.feed_leftover(b"\x00\x00\x00\x01x\x00\x00\x00\x02yz", &mut |m| {
            out.push(m.value);
            Ok(())
        })
        .unwrap();
        assert_eq!(out, vec![b"x".to_vec(), b"yz".to_vec()]);
    }

    #[test]
    fn oversize_header_is_malformed() {
        let mut r = RequestReader::new(4, 4, Arc::new(EchoFactory));
        let err = r.feed_leftover(b"\x00\x00\x00\x05abcde", &mut |_| Ok(())).unwrap_err();
        assert!(matches!(err, ServerError::MalformedFrame { declared: 5, max: 4 }));
    }

    #[test]
    fn handler_failure_from_on_message_is_propagated() {
        let mut r = reader();
        let err = r
            .feed_leftover(b"\x00\x00\x00\x05hello", &mut |_| {
                Err(ServerError::HandlerFailure { token: mio::Token(0) })
            })
            .unwrap_err();
        assert!(matches!(err, ServerError::HandlerFailure { .. }));
    }
}
