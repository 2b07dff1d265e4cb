//! # Framing Layer
//!
//! Both directions of the protocol are text messages terminated by
//! `\r\n\r\n`. A single socket read may deliver part of a frame, exactly one
//! frame, or several pipelined frames; `FrameBuffer` hides that from the
//! connection worker and the client.
//!
//! There is no maximum frame size. An UPLOAD carries the whole file as one
//! base64 blob, so a frame is as large as the file (times 4/3). A production
//! redesign would switch to length-prefixed chunked streaming instead of
//! adding a silent ceiling here.

use bytes::{Buf, Bytes, BytesMut};

/// Byte sequence that ends every request and response
pub const TERMINATOR: &[u8] = b"\r\n\r\n";

/// Accumulates raw bytes and yields complete frames
///
/// Bytes after the last terminator stay buffered until a later read
/// completes them. When the peer closes, whatever is still pending is an
/// unterminated remainder and must be discarded rather than dispatched.
///
/// Socket readers fill the buffer in place through `read_target` and pull
/// frames with `next_frame`; a frame is split off the buffer without
/// copying its bytes.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buffer: BytesMut,
    // Offset where the next terminator search starts. Everything before it
    // is known not to contain the start of a terminator.
    scan_from: usize,
}

impl FrameBuffer {
    /// Create an empty frame buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a frame buffer with room for `capacity` bytes
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(capacity),
            scan_from: 0,
        }
    }

    /// Buffer to pass to `read_buf`, with at least `additional` bytes free
    pub fn read_target(&mut self, additional: usize) -> &mut BytesMut {
        self.buffer.reserve(additional);
        &mut self.buffer
    }

    /// Split off the next complete frame, without its terminator
    ///
    /// An empty frame (two terminators back to back) is returned as empty
    /// bytes.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        let search_from = self.scan_from.min(self.buffer.len());
        match find_terminator(&self.buffer[search_from..]) {
            Some(offset) => {
                let frame = self.buffer.split_to(search_from + offset).freeze();
                self.buffer.advance(TERMINATOR.len());
                self.scan_from = 0;
                Some(frame)
            }
            None => {
                // A terminator split across reads can only begin in the
                // last TERMINATOR.len() - 1 bytes of what is buffered now.
                self.scan_from = self.buffer.len().saturating_sub(TERMINATOR.len() - 1);
                None
            }
        }
    }

    /// Append newly read bytes and return every frame they complete
    ///
    /// Frames are returned in arrival order.
    pub fn accumulate(&mut self, bytes: &[u8]) -> Vec<Bytes> {
        self.buffer.extend_from_slice(bytes);
        std::iter::from_fn(|| self.next_frame()).collect()
    }

    /// Bytes received after the last complete frame
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }

    /// Number of buffered bytes not yet part of a complete frame
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether a partial frame is buffered
    pub fn has_partial(&self) -> bool {
        !self.buffer.is_empty()
    }

    /// Drop any partial frame, returning how many bytes were discarded
    pub fn discard(&mut self) -> usize {
        let discarded = self.buffer.len();
        self.buffer.clear();
        self.scan_from = 0;
        discarded
    }
}

/// Append the terminator to a payload, producing one wire frame
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut frame = BytesMut::with_capacity(payload.len() + TERMINATOR.len());
    frame.extend_from_slice(payload);
    frame.extend_from_slice(TERMINATOR);
    frame.freeze()
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(TERMINATOR.len())
        .position(|window| window == TERMINATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const REQUEST: &[u8] = b"UPLOAD notes.txt aGVsbG8gd29ybGQ=\r\n\r\n";

    #[test]
    fn test_single_frame_in_one_read() {
        let mut frames = FrameBuffer::new();
        let out = frames.accumulate(REQUEST);
        assert_eq!(out, vec![Bytes::from_static(b"UPLOAD notes.txt aGVsbG8gd29ybGQ=")]);
        assert!(!frames.has_partial());
    }

    #[test]
    fn test_every_two_way_split_yields_one_frame() {
        for split in 0..=REQUEST.len() {
            let mut frames = FrameBuffer::new();
            let mut out = frames.accumulate(&REQUEST[..split]);
            out.extend(frames.accumulate(&REQUEST[split..]));
            assert_eq!(out.len(), 1, "split at {}", split);
            assert_eq!(&out[0][..], &REQUEST[..REQUEST.len() - TERMINATOR.len()]);
            assert_eq!(frames.pending_len(), 0);
        }
    }

    #[test]
    fn test_random_chunking_yields_identical_frame() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut payload = b"UPLOAD big.bin ".to_vec();
        payload.extend((0..20_000).map(|_| b'A' + rng.gen_range(0..26u8)));
        let wire = encode_frame(&payload);

        for _ in 0..200 {
            let mut frames = FrameBuffer::new();
            let mut out = Vec::new();
            let mut rest: &[u8] = &wire;
            while !rest.is_empty() {
                let take = rng.gen_range(1..=rest.len().min(4096));
                out.extend(frames.accumulate(&rest[..take]));
                rest = &rest[take..];
            }
            assert_eq!(out, vec![Bytes::from(payload.clone())]);
        }
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut frames = FrameBuffer::new();
        let mut out = Vec::new();
        for byte in REQUEST {
            out.extend(frames.accumulate(std::slice::from_ref(byte)));
        }
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_pipelined_frames_in_one_read() {
        let mut frames = FrameBuffer::new();
        let out = frames.accumulate(b"LIST\r\n\r\nGET a.bin\r\n\r\nGET b");
        assert_eq!(out, vec![Bytes::from_static(b"LIST"), Bytes::from_static(b"GET a.bin")]);
        assert_eq!(frames.pending(), b"GET b");

        let out = frames.accumulate(b".bin\r\n\r\n");
        assert_eq!(out, vec![Bytes::from_static(b"GET b.bin")]);
        assert!(!frames.has_partial());
    }

    #[test]
    fn test_terminator_split_across_reads() {
        let mut frames = FrameBuffer::new();
        assert!(frames.accumulate(b"LIST\r\n").is_empty());
        assert!(frames.accumulate(b"\r").is_empty());
        assert_eq!(frames.accumulate(b"\n"), vec![Bytes::from_static(b"LIST")]);
    }

    #[test]
    fn test_back_to_back_terminators_yield_empty_frame() {
        let mut frames = FrameBuffer::new();
        let out = frames.accumulate(b"LIST\r\n\r\n\r\n\r\n");
        assert_eq!(out, vec![Bytes::from_static(b"LIST"), Bytes::new()]);
    }

    #[test]
    fn test_unterminated_remainder_is_discardable() {
        let mut frames = FrameBuffer::new();
        assert!(frames.accumulate(b"UPLOAD half.bin QUJD").is_empty());
        assert!(frames.has_partial());
        assert_eq!(frames.discard(), 20);
        assert!(!frames.has_partial());
    }

    #[test]
    fn test_encode_frame_appends_terminator() {
        assert_eq!(&encode_frame(b"{}")[..], b"{}\r\n\r\n");
    }

    #[tokio::test]
    async fn test_read_buf_fills_frames_in_place() {
        let (mut client, mut server) = tokio::io::duplex(16);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            client.write_all(b"LIST\r\n\r\nGET a.bin\r\n\r\nGET").await.unwrap();
        });

        let mut frames = FrameBuffer::with_capacity(8);
        let mut out = Vec::new();
        loop {
            let n = server.read_buf(frames.read_target(8)).await.unwrap();
            if n == 0 {
                break;
            }
            while let Some(frame) = frames.next_frame() {
                out.push(frame);
            }
        }
        assert_eq!(out, vec![Bytes::from_static(b"LIST"), Bytes::from_static(b"GET a.bin")]);
        assert_eq!(frames.pending(), b"GET");
    }
}
