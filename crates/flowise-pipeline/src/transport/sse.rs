use serde_json::{Value, json};

use crate::event::Chunk;

/// One server-sent event frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE decoder.
///
/// Bytes may be split anywhere, including inside a UTF-8 sequence, so
/// decoding happens only once a full frame (blank-line terminated) is
/// buffered.
#[derive(Default)]
pub(crate) struct SseDecoder {
    buf: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.extend_from_slice(chunk);
        let mut frames = Vec::new();
        while let Some((end, delim_len)) = frame_boundary(&self.buf) {
            let frame: Vec<u8> = self.buf.drain(..end + delim_len).take(end).collect();
            if let Some(frame) = parse_frame(&frame) {
                frames.push(frame);
            }
        }
        frames
    }

    /// Flushes a trailing frame the server did not terminate.
    pub fn finish(&mut self) -> Option<SseFrame> {
        let rest = std::mem::take(&mut self.buf);
        parse_frame(&rest)
    }
}

fn frame_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|i| {
        let rest = &buf[i..];
        if rest.starts_with(b"\r\n\r\n") {
            Some((i, 4))
        } else if rest.starts_with(b"\n\n") {
            Some((i, 2))
        } else {
            None
        }
    })
}

fn parse_frame(bytes: &[u8]) -> Option<SseFrame> {
    let text = String::from_utf8_lossy(bytes);
    let mut event = None;
    let mut data: Vec<&str> = Vec::new();
    for line in text.lines() {
        // Flowise prefixes frames with a bare `message:` line; it carries
        // nothing and falls through like any other unknown field.
        if let Some(rest) = line.strip_prefix("data:") {
            data.push(rest.strip_prefix(' ').unwrap_or(rest));
        } else if let Some(rest) = line.strip_prefix("event:") {
            event = Some(rest.trim().to_string());
        }
    }
    if event.is_none() && data.is_empty() {
        return None;
    }
    Some(SseFrame {
        event,
        data: data.join("\n"),
    })
}

/// Turns a frame into a transport chunk.
///
/// Flowise's own framing puts a full `{event, data}` record in `data:`.
/// Servers that use named SSE events instead get a record synthesised from
/// the event name.
pub(crate) fn frame_to_chunk(frame: SseFrame) -> Option<Chunk> {
    let data = frame.data.trim();
    if data.is_empty() || data == "[DONE]" {
        return None;
    }
    match frame.event.as_deref() {
        None | Some("") | Some("message") => Some(Chunk::Raw(frame.data)),
        // Token text is the answer itself and must reach the renderer as sent.
        Some("token") => Some(Chunk::Record(
            json!({ "event": "token", "data": Value::String(frame.data) }),
        )),
        Some(name) => {
            let data = serde_json::from_str::<Value>(data).unwrap_or_else(|_| json!(frame.data));
            Some(Chunk::Record(json!({ "event": name, "data": data })))
        }
    }
}
