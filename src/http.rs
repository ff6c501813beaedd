//! Minimal HTTP/1.1 surface for the streaming endpoints
//!
//! Only what the wire needs: read a request head, route by path, and emit
//! fixed response heads plus the multipart frame framing. Every connection
//! serves exactly one streaming response, so there is no keep-alive, no
//! chunked coding, and headers beyond the request line are ignored.

use bytes::{Bytes, BytesMut};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Multipart boundary token used for the video stream
pub const FRAME_BOUNDARY: &str = "frame";

/// Upper bound on an accepted request head
const MAX_REQUEST_BYTES: usize = 8 * 1024;

/// Response head for the video stream handshake
pub const VIDEO_RESPONSE_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
Connection: close\r\n\
Cache-Control: no-cache, no-store\r\n\
Pragma: no-cache\r\n\
Content-Type: multipart/x-mixed-replace; boundary=frame\r\n\
\r\n";

/// Response head for the audio stream handshake
pub const AUDIO_RESPONSE_HEAD: &[u8] = b"HTTP/1.1 200 OK\r\n\
Connection: close\r\n\
Cache-Control: no-cache, no-store\r\n\
Content-Type: audio/wav\r\n\
\r\n";

/// Response for unroutable or malformed requests
pub const NOT_FOUND_RESPONSE: &[u8] = b"HTTP/1.1 404 Not Found\r\n\
Connection: close\r\n\
Content-Length: 0\r\n\
\r\n";

/// Response for `/audio` when no audio channel is running
pub const AUDIO_UNAVAILABLE_RESPONSE: &[u8] = b"HTTP/1.1 503 Service Unavailable\r\n\
Connection: close\r\n\
Content-Length: 0\r\n\
\r\n";

/// Errors while reading or parsing a request head
#[derive(Error, Debug)]
pub enum RequestError {
    #[error("i/o error reading request: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection closed before request was complete")]
    Truncated,

    #[error("request head exceeds {0} bytes")]
    TooLarge(usize),

    #[error("malformed request: {0}")]
    Malformed(&'static str),
}

/// Parsed request line; headers and body are intentionally ignored
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub method: String,
    pub path: String,
}

/// Which stream a request is asking for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamTarget {
    Video,
    Audio,
    NotFound,
}

/// Routes a request path to a stream target
pub fn classify_target(path: &str) -> StreamTarget {
    match path {
        "/" | "/video" => StreamTarget::Video,
        "/audio" => StreamTarget::Audio,
        _ => StreamTarget::NotFound,
    }
}

/// Reads a request head up to the blank line and parses the request line.
///
/// The query string is stripped from the target. Anything that does not
/// look like an HTTP/1.x request line is rejected.
pub async fn read_request<R>(reader: &mut R) -> Result<Request, RequestError>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];

    let head_len = loop {
        if let Some(end) = find_head_end(&buf) {
            break end;
        }
        if buf.len() > MAX_REQUEST_BYTES {
            return Err(RequestError::TooLarge(MAX_REQUEST_BYTES));
        }

        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            return Err(RequestError::Truncated);
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    parse_request_line(&buf[..head_len])
}

/// Builds one multipart part for a compressed frame.
///
/// Exact wire format:
///
/// ```text
/// --frame\r\n
/// Content-Type: image/jpeg\r\n
/// Content-Length: <payload length>\r\n
/// \r\n
/// <payload bytes>\r\n
/// ```
pub fn frame_part(payload: &[u8]) -> Bytes {
    let head = format!(
        "--{}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        FRAME_BOUNDARY,
        payload.len()
    );

    let mut part = BytesMut::with_capacity(head.len() + payload.len() + 2);
    part.extend_from_slice(head.as_bytes());
    part.extend_from_slice(payload);
    part.extend_from_slice(b"\r\n");
    part.freeze()
}

fn find_head_end(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_request_line(head: &[u8]) -> Result<Request, RequestError> {
    let line_end = head
        .windows(2)
        .position(|w| w == b"\r\n")
        .unwrap_or(head.len());
    let line = std::str::from_utf8(&head[..line_end])
        .map_err(|_| RequestError::Malformed("request line is not utf-8"))?;

    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or(RequestError::Malformed("empty request line"))?;
    let target = parts
        .next()
        .ok_or(RequestError::Malformed("missing request target"))?;
    let version = parts
        .next()
        .ok_or(RequestError::Malformed("missing protocol version"))?;

    if !version.starts_with("HTTP/") {
        return Err(RequestError::Malformed("unrecognized protocol version"));
    }

    let path = target.split('?').next().unwrap_or(target).to_string();

    Ok(Request {
        method: method.to_string(),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn parse(raw: &[u8]) -> Result<Request, RequestError> {
        let mut reader = raw;
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn test_parse_simple_get() {
        let req = parse(b"GET / HTTP/1.1\r\nHost: box\r\n\r\n").await.unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/");
    }

    #[tokio::test]
    async fn test_parse_strips_query_string() {
        let req = parse(b"GET /video?t=123 HTTP/1.1\r\n\r\n").await.unwrap();
        assert_eq!(req.path, "/video");
    }

    #[tokio::test]
    async fn test_parse_ignores_extra_headers() {
        let raw = b"GET /audio HTTP/1.0\r\nAccept: */*\r\nUser-Agent: vlc\r\n\r\n";
        let req = parse(raw).await.unwrap();
        assert_eq!(req.path, "/audio");
    }

    #[tokio::test]
    async fn test_parse_rejects_missing_version() {
        let err = parse(b"GET /\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, RequestError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_parse_rejects_non_http_version() {
        let err = parse(b"GET / RTSP/1.0\r\n\r\n").await.unwrap_err();
        assert!(matches!(err, RequestError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_parse_truncated_request() {
        let err = parse(b"GET / HT").await.unwrap_err();
        assert!(matches!(err, RequestError::Truncated));
    }

    #[tokio::test]
    async fn test_parse_oversized_request() {
        let raw = vec![b'a'; MAX_REQUEST_BYTES + 512];
        let err = parse(&raw).await.unwrap_err();
        assert!(matches!(err, RequestError::TooLarge(_)));
    }

    #[test]
    fn test_classify_targets() {
        assert_eq!(classify_target("/"), StreamTarget::Video);
        assert_eq!(classify_target("/video"), StreamTarget::Video);
        assert_eq!(classify_target("/audio"), StreamTarget::Audio);
        assert_eq!(classify_target("/unknown"), StreamTarget::NotFound);
        assert_eq!(classify_target("/audio/"), StreamTarget::NotFound);
    }

    #[test]
    fn test_frame_part_exact_bytes() {
        let part = frame_part(b"JPEGDATA");

        let expected = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 8\r\n\r\nJPEGDATA\r\n";
        assert_eq!(&part[..], &expected[..]);
    }

    #[test]
    fn test_frame_part_empty_payload() {
        let part = frame_part(b"");
        assert_eq!(
            &part[..],
            b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 0\r\n\r\n\r\n"
        );
    }

    #[test]
    fn test_response_heads_are_terminated() {
        for head in [
            VIDEO_RESPONSE_HEAD,
            AUDIO_RESPONSE_HEAD,
            NOT_FOUND_RESPONSE,
            AUDIO_UNAVAILABLE_RESPONSE,
        ] {
            assert!(head.ends_with(b"\r\n\r\n"));
        }
    }

    #[test]
    fn test_video_head_advertises_boundary() {
        let head = std::str::from_utf8(VIDEO_RESPONSE_HEAD).unwrap();
        assert!(head.contains("multipart/x-mixed-replace"));
        assert!(head.contains(&format!("boundary={}", FRAME_BOUNDARY)));
    }
}
