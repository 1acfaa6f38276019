//! Line-oriented frame assembly for backend chat streams.
//!
//! Backends either frame events as SSE (`data: {...}` lines terminated by a
//! blank line) or write one bare JSON object per line. [`FrameAssembler`]
//! accepts both and reports the `[DONE]` sentinel; [`event_stream`] adapts an
//! HTTP body into decoded [`StreamEvent`]s.

use crate::protocol::codec::decode_chunk;
use crate::protocol::StreamEvent;
use futures_util::Stream;
use memchr::memchr_iter;
use std::collections::VecDeque;

const DONE_SENTINEL: &str = "[DONE]";

/// Outcome of feeding one line to the assembler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameResult {
    CompleteChunk(String),
    Continuation,
    StreamTerminated,
}

#[inline]
fn is_done_sentinel(chunk: &str) -> bool {
    chunk.eq_ignore_ascii_case(DONE_SENTINEL)
}

// ---------------------------------------------------------------------------
// FrameAssembler
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: String,
    ready: Option<FrameResult>,
}

impl FrameAssembler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its terminator), or `None` at end of stream.
    ///
    /// A bare line arriving while a `data:` frame is open closes that frame:
    /// the frame is returned and the bare line's own result is held for
    /// [`take_ready`](Self::take_ready).
    pub fn feed(&mut self, line: Option<&str>) -> FrameResult {
        let Some(line) = line else {
            return self.flush();
        };
        let line = line.strip_suffix('\r').unwrap_or(line);
        let trimmed = line.trim();

        if trimmed.is_empty() {
            return self.flush();
        }

        if let Some(value) = trimmed.strip_prefix("data:") {
            let value = value.trim();
            if !value.is_empty() {
                self.append(value);
            }
            return FrameResult::Continuation;
        }

        if trimmed.starts_with(':')
            || trimmed.starts_with("event:")
            || trimmed.starts_with("id:")
            || trimmed.starts_with("retry:")
        {
            return FrameResult::Continuation;
        }

        let bare = Self::complete(trimmed.to_owned());
        if self.buffer.is_empty() {
            return bare;
        }
        self.ready = Some(bare);
        self.flush()
    }

    /// Result held back by the last [`feed`](Self::feed), if any.
    #[inline]
    pub fn take_ready(&mut self) -> Option<FrameResult> {
        self.ready.take()
    }

    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.buffer.is_empty()
    }

    #[inline]
    fn append(&mut self, value: &str) {
        if !self.buffer.is_empty() {
            self.buffer.push('\n');
        }
        self.buffer.push_str(value);
    }

    fn flush(&mut self) -> FrameResult {
        let chunk = std::mem::take(&mut self.buffer);
        let chunk = chunk.trim();
        if chunk.is_empty() {
            return FrameResult::Continuation;
        }
        Self::complete(chunk.to_owned())
    }

    #[inline]
    fn complete(chunk: String) -> FrameResult {
        if is_done_sentinel(&chunk) {
            FrameResult::StreamTerminated
        } else {
            FrameResult::CompleteChunk(chunk)
        }
    }
}

// ---------------------------------------------------------------------------
// ChunkDecoder: bytes to lines to chunks to events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeFlow {
    Continue,
    Terminated,
}

/// Incremental byte decoder.
///
/// Lines are split on `\n` before UTF-8 decoding. A newline byte never occurs
/// inside a multi-byte sequence, so a character split across network chunks
/// stays in `partial` until its line completes.
#[derive(Debug, Default)]
pub struct ChunkDecoder {
    assembler: FrameAssembler,
    partial: Vec<u8>,
    terminated: bool,
}

impl ChunkDecoder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Feed raw body bytes, appending decoded events to `out`.
    pub fn push(&mut self, bytes: &[u8], out: &mut VecDeque<StreamEvent>) -> DecodeFlow {
        if self.terminated {
            return DecodeFlow::Terminated;
        }
        let mut line_start = 0usize;
        for pos in memchr_iter(b'\n', bytes) {
            let flow = if self.partial.is_empty() {
                self.process_line(&bytes[line_start..pos], out)
            } else {
                self.partial.extend_from_slice(&bytes[line_start..pos]);
                let line = std::mem::take(&mut self.partial);
                self.process_line(&line, out)
            };
            line_start = pos + 1;
            if flow == DecodeFlow::Terminated {
                self.partial.clear();
                return flow;
            }
        }
        self.partial.extend_from_slice(&bytes[line_start..]);
        DecodeFlow::Continue
    }

    /// Flush whatever is left at end of body.
    pub fn finish(&mut self, out: &mut VecDeque<StreamEvent>) -> DecodeFlow {
        if self.terminated {
            return DecodeFlow::Terminated;
        }
        if !self.partial.is_empty() {
            let line = std::mem::take(&mut self.partial);
            if self.process_line(&line, out) == DecodeFlow::Terminated {
                return DecodeFlow::Terminated;
            }
        }
        let result = self.assembler.feed(None);
        self.handle(result, out)
    }

    fn process_line(&mut self, raw: &[u8], out: &mut VecDeque<StreamEvent>) -> DecodeFlow {
        let line = String::from_utf8_lossy(raw);
        let result = self.assembler.feed(Some(&line));
        if self.handle(result, out) == DecodeFlow::Terminated {
            return DecodeFlow::Terminated;
        }
        match self.assembler.take_ready() {
            Some(result) => self.handle(result, out),
            None => DecodeFlow::Continue,
        }
    }

    fn handle(&mut self, result: FrameResult, out: &mut VecDeque<StreamEvent>) -> DecodeFlow {
        match result {
            FrameResult::CompleteChunk(chunk) => {
                out.extend(decode_chunk(&chunk));
                DecodeFlow::Continue
            }
            FrameResult::Continuation => DecodeFlow::Continue,
            FrameResult::StreamTerminated => {
                self.terminated = true;
                DecodeFlow::Terminated
            }
        }
    }
}

/// Adapt an HTTP body byte stream into decoded events.
///
/// Undecodable chunks are logged and skipped. The stream ends at `[DONE]`
/// (remaining body bytes are not read), at end of body, or after yielding the
/// first transport error.
pub fn event_stream<S, E>(byte_stream: S) -> impl Stream<Item = Result<StreamEvent, E>> + Send
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    use futures_util::StreamExt;

    futures_util::stream::unfold(
        (
            Box::pin(byte_stream),
            ChunkDecoder::new(),
            VecDeque::<StreamEvent>::with_capacity(8),
            false,
        ),
        |(mut stream, mut decoder, mut pending, mut done)| async move {
            loop {
                if let Some(event) = pending.pop_front() {
                    return Some((Ok(event), (stream, decoder, pending, done)));
                }
                if done {
                    return None;
                }
                match stream.as_mut().next().await {
                    Some(Ok(bytes)) => {
                        if decoder.push(&bytes, &mut pending) == DecodeFlow::Terminated {
                            done = true;
                        }
                    }
                    Some(Err(err)) => {
                        return Some((Err(err), (stream, decoder, pending, true)));
                    }
                    None => {
                        decoder.finish(&mut pending);
                        done = true;
                    }
                }
            }
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn decode_all(parts: &[&[u8]]) -> Vec<StreamEvent> {
        let mut decoder = ChunkDecoder::new();
        let mut out = VecDeque::new();
        for part in parts {
            if decoder.push(part, &mut out) == DecodeFlow::Terminated {
                return out.into_iter().collect();
            }
        }
        decoder.finish(&mut out);
        out.into_iter().collect()
    }

    #[test]
    fn test_assembler_sse_frame() {
        let mut asm = FrameAssembler::new();
        assert_eq!(
            asm.feed(Some("data: {\"type\":\"text\",\"text\":\"Hi\"}")),
            FrameResult::Continuation
        );
        assert_eq!(
            asm.feed(Some("")),
            FrameResult::CompleteChunk("{\"type\":\"text\",\"text\":\"Hi\"}".to_string())
        );
        assert_eq!(asm.feed(Some("")), FrameResult::Continuation);
    }

    #[test]
    fn test_assembler_multiline_data_joined() {
        let mut asm = FrameAssembler::new();
        asm.feed(Some("data: {\"type\":\"text\","));
        asm.feed(Some("data: \"text\":\"x\"}"));
        assert_eq!(
            asm.feed(Some("")),
            FrameResult::CompleteChunk("{\"type\":\"text\",\n\"text\":\"x\"}".to_string())
        );
    }

    #[test]
    fn test_assembler_bare_json_line() {
        let mut asm = FrameAssembler::new();
        assert_eq!(
            asm.feed(Some("{\"type\":\"finish\",\"reason\":\"stop\"}\r")),
            FrameResult::CompleteChunk("{\"type\":\"finish\",\"reason\":\"stop\"}".to_string())
        );
    }

    #[test]
    fn test_assembler_ignores_sse_fields_and_comments() {
        let mut asm = FrameAssembler::new();
        assert_eq!(asm.feed(Some(": keep-alive")), FrameResult::Continuation);
        assert_eq!(asm.feed(Some("event: message")), FrameResult::Continuation);
        assert_eq!(asm.feed(Some("id: 7")), FrameResult::Continuation);
        assert_eq!(asm.feed(Some("retry: 1000")), FrameResult::Continuation);
        assert!(!asm.has_pending());
    }

    #[test]
    fn test_assembler_done_sentinel_variants() {
        let mut asm = FrameAssembler::new();
        assert_eq!(asm.feed(Some("[DONE]")), FrameResult::StreamTerminated);
        let mut asm = FrameAssembler::new();
        asm.feed(Some("data: [done]"));
        assert_eq!(asm.feed(Some("")), FrameResult::StreamTerminated);
    }

    #[test]
    fn test_assembler_flushes_residual_at_end() {
        let mut asm = FrameAssembler::new();
        asm.feed(Some("data: {\"type\":\"text\",\"text\":\"tail\"}"));
        assert_eq!(
            asm.feed(None),
            FrameResult::CompleteChunk("{\"type\":\"text\",\"text\":\"tail\"}".to_string())
        );
        assert_eq!(asm.feed(None), FrameResult::Continuation);
    }

    #[test]
    fn test_done_sentinel_stops_decoding() {
        let events = decode_all(&[
            b"data: {\"type\":\"text\",\"text\":\"Hi\"}\n\n[DONE]\n",
            b"data: {\"type\":\"text\",\"text\":\"after\"}\n\n",
        ]);
        assert_eq!(events, vec![StreamEvent::text("Hi")]);
    }

    #[test]
    fn test_malformed_chunk_skipped() {
        let events = decode_all(&[
            b"data: {\"type\":\"text\",\"text\":\"a\"}\n\n",
            b"data: {not json\n\n",
            b"data: {\"type\":\"text\",\"text\":\"b\"}\n\n",
        ]);
        assert_eq!(events, vec![StreamEvent::text("a"), StreamEvent::text("b")]);
    }

    #[test]
    fn test_split_utf8_and_crlf() {
        let frame = "data: {\"type\":\"text\",\"text\":\"结果\"}\r\n\r\n".as_bytes();
        // Split inside the first multi-byte character.
        let cut = frame.iter().position(|b| *b >= 0x80).unwrap() + 1;
        let events = decode_all(&[&frame[..cut], &frame[cut..]]);
        assert_eq!(events, vec![StreamEvent::text("结果")]);
    }

    #[test]
    fn test_bare_ndjson_without_trailing_newline() {
        let events = decode_all(&[
            b"{\"type\":\"content\",\"text\":\"a\"}\n{\"type\":\"finish\",",
            b"\"reason\":\"stop\"}",
        ]);
        assert_eq!(
            events,
            vec![StreamEvent::content("a"), StreamEvent::finish("stop")]
        );
    }

    #[test]
    fn test_assembler_bare_line_closes_open_frame() {
        let mut asm = FrameAssembler::new();
        asm.feed(Some("data: {\"type\":\"text\",\"text\":\"a\"}"));
        assert_eq!(
            asm.feed(Some("[DONE]")),
            FrameResult::CompleteChunk("{\"type\":\"text\",\"text\":\"a\"}".to_string())
        );
        assert_eq!(asm.take_ready(), Some(FrameResult::StreamTerminated));
        assert_eq!(asm.take_ready(), None);
        assert!(!asm.has_pending());
    }

    #[test]
    fn test_done_after_open_data_frame_terminates() {
        let mut decoder = ChunkDecoder::new();
        let mut out = VecDeque::new();
        let flow = decoder.push(
            b"data: {\"type\":\"text\",\"text\":\"Hi\"}\n[DONE]\ndata: {\"type\":\"text\",\"text\":\"x\"}\n\n",
            &mut out,
        );
        assert_eq!(flow, DecodeFlow::Terminated);
        assert!(decoder.is_terminated());
        assert_eq!(out.into_iter().collect::<Vec<_>>(), vec![StreamEvent::text("Hi")]);
    }

    #[test]
    fn test_bare_line_glued_to_open_data_frame() {
        let events = decode_all(&[
            b"data: {\"type\":\"text\",\"text\":\"a\"}\n{\"type\":\"text\",\"text\":\"b\"}\n\n",
        ]);
        assert_eq!(events, vec![StreamEvent::text("a"), StreamEvent::text("b")]);
    }

    #[tokio::test]
    async fn test_event_stream_surfaces_transport_error_last() {
        let parts: Vec<Result<bytes::Bytes, &'static str>> = vec![
            Ok(bytes::Bytes::from_static(
                b"data: {\"type\":\"text\",\"text\":\"x\"}\n\n",
            )),
            Err("reset"),
            Ok(bytes::Bytes::from_static(
                b"data: {\"type\":\"text\",\"text\":\"y\"}\n\n",
            )),
        ];
        let items: Vec<_> = event_stream(futures_util::stream::iter(parts))
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(StreamEvent::text("x")));
        assert_eq!(items[1], Err("reset"));
    }
}
