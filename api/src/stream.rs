//! Stream-mode detection and chunk framing.
//!
//! The invoker hands the raw upstream byte stream to [`chunk_stream`],
//! which yields de-framed chunk payloads ready for the conversion chains;
//! [`wrap_chunk`] restores framing for the client-facing dialect.

use aog_client::ByteStream;
use aog_client::TransportError;
use bytes::Bytes;
use eventsource_stream::EventStreamError;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use futures::stream::BoxStream;
use http::HeaderMap;
use http::header::CONTENT_TYPE;
use strum_macros::Display;
use tokio_util::codec::FramedRead;
use tokio_util::codec::LinesCodec;
use tokio_util::io::StreamReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StreamMode {
    #[strum(serialize = "non-stream")]
    NonStream,
    #[strum(serialize = "event-stream")]
    EventStream,
    #[strum(serialize = "ndjson")]
    Ndjson,
}

impl StreamMode {
    pub fn is_stream(self) -> bool {
        !matches!(self, StreamMode::NonStream)
    }

    pub fn content_type(self) -> &'static str {
        match self {
            StreamMode::NonStream => "application/json",
            StreamMode::EventStream => "text/event-stream",
            StreamMode::Ndjson => "application/x-ndjson",
        }
    }
}

/// Classify a response by its Content-Type.
pub fn detect_stream_mode(headers: &HeaderMap) -> StreamMode {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return StreamMode::NonStream;
    };
    if content_type.starts_with("text/event-stream") {
        StreamMode::EventStream
    } else if content_type.starts_with("application/x-ndjson") {
        StreamMode::Ndjson
    } else {
        StreamMode::NonStream
    }
}

/// Turn a raw upstream byte stream into a stream of de-framed chunk
/// payloads. Event-stream mode yields one `data:` record per item (the
/// prefix already stripped); NDJSON yields one line per item. Empty and
/// whitespace-only chunks are dropped.
pub fn chunk_stream(
    mode: StreamMode,
    bytes: ByteStream,
) -> BoxStream<'static, Result<Bytes, TransportError>> {
    match mode {
        StreamMode::EventStream => {
            let stream = bytes.eventsource().filter_map(|item| async move {
                match item {
                    Ok(event) => {
                        if event.data.trim().is_empty() {
                            None
                        } else {
                            Some(Ok(Bytes::from(event.data)))
                        }
                    }
                    Err(err) => Some(Err(map_sse_error(err))),
                }
            });
            stream.boxed()
        }
        StreamMode::Ndjson => {
            let reader = StreamReader::new(bytes.map(|item| item.map_err(std::io::Error::other)));
            let stream = FramedRead::new(reader, LinesCodec::new()).filter_map(|item| async move {
                match item {
                    Ok(line) => {
                        if line.trim().is_empty() {
                            None
                        } else {
                            Some(Ok(Bytes::from(line)))
                        }
                    }
                    Err(err) => Some(Err(TransportError::Network(err.to_string()))),
                }
            });
            stream.boxed()
        }
        StreamMode::NonStream => bytes,
    }
}

fn map_sse_error(err: EventStreamError<TransportError>) -> TransportError {
    match err {
        EventStreamError::Transport(inner) => inner,
        other => TransportError::Network(other.to_string()),
    }
}

/// Re-apply framing to a converted chunk payload.
pub fn wrap_chunk(mode: StreamMode, payload: &[u8]) -> Bytes {
    match mode {
        StreamMode::EventStream => {
            let mut framed = Vec::with_capacity(payload.len() + 8);
            framed.extend_from_slice(b"data: ");
            framed.extend_from_slice(payload);
            framed.extend_from_slice(b"\n\n");
            Bytes::from(framed)
        }
        StreamMode::Ndjson => {
            let mut framed = Vec::with_capacity(payload.len() + 1);
            framed.extend_from_slice(payload);
            framed.push(b'\n');
            Bytes::from(framed)
        }
        StreamMode::NonStream => Bytes::copy_from_slice(payload),
    }
}

/// Frame a prologue/epilogue line. Lines are emitted verbatim (they carry
/// their own `data:` prefix when the dialect wants one) plus the mode's
/// record terminator.
pub fn wrap_line(mode: StreamMode, line: &str) -> Bytes {
    let terminator: &[u8] = match mode {
        StreamMode::EventStream => b"\n\n",
        StreamMode::Ndjson | StreamMode::NonStream => b"\n",
    };
    let mut framed = Vec::with_capacity(line.len() + terminator.len());
    framed.extend_from_slice(line.as_bytes());
    framed.extend_from_slice(terminator);
    Bytes::from(framed)
}
