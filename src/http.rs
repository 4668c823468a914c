//! Minimal HTTP/1.1 framing for the API surface: request-line + headers +
//! Content-Length bodies, keep-alive by default. No chunked encoding, no
//! TLS; the server sits behind a terminating proxy in production.

use std::collections::HashMap;
use std::fmt;
use std::io;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::limits;

#[derive(Debug)]
pub enum HttpError {
    Io(io::Error),
    /// Malformed request line or header.
    Malformed(&'static str),
    /// Request exceeded a framing limit (line, headers, or body).
    TooLarge(&'static str),
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpError::Io(e) => write!(f, "io error: {e}"),
            HttpError::Malformed(what) => write!(f, "malformed request: {what}"),
            HttpError::TooLarge(what) => write!(f, "request too large: {what}"),
        }
    }
}

impl std::error::Error for HttpError {}

impl From<io::Error> for HttpError {
    fn from(e: io::Error) -> Self {
        HttpError::Io(e)
    }
}

#[derive(Debug)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub query: HashMap<String, String>,
    /// Header names lowercased at parse time.
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl Request {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).map(String::as_str)
    }

    /// True when the client asked to drop the connection after this exchange.
    pub fn wants_close(&self) -> bool {
        self.header("connection")
            .is_some_and(|v| v.eq_ignore_ascii_case("close"))
    }
}

/// Read one request off the stream. Returns Ok(None) on clean EOF before
/// any bytes of a request line, which is how keep-alive connections end.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<Request>, HttpError>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut line = String::new();
    let n = (&mut *reader)
        .take(limits::MAX_REQUEST_LINE_BYTES as u64)
        .read_line(&mut line)
        .await?;
    if n == 0 {
        return Ok(None);
    }
    if !line.ends_with('\n') {
        return Err(HttpError::TooLarge("request line"));
    }

    let mut parts = line.split_ascii_whitespace();
    let method = parts
        .next()
        .ok_or(HttpError::Malformed("request line"))?
        .to_string();
    let target = parts.next().ok_or(HttpError::Malformed("request line"))?;
    match parts.next() {
        Some("HTTP/1.1") | Some("HTTP/1.0") => {}
        _ => return Err(HttpError::Malformed("http version")),
    }

    let (path, query) = match target.split_once('?') {
        Some((p, q)) => (p.to_string(), parse_query(q)),
        None => (target.to_string(), HashMap::new()),
    };

    let mut headers = HashMap::new();
    loop {
        if headers.len() > limits::MAX_HEADER_COUNT {
            return Err(HttpError::TooLarge("headers"));
        }
        let mut line = String::new();
        let n = (&mut *reader)
            .take(limits::MAX_REQUEST_LINE_BYTES as u64)
            .read_line(&mut line)
            .await?;
        if n == 0 {
            return Err(HttpError::Malformed("truncated headers"));
        }
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        let (name, value) = line.split_once(':').ok_or(HttpError::Malformed("header"))?;
        headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
    }

    let body = match headers.get("content-length") {
        Some(len) => {
            let len: usize = len
                .parse()
                .map_err(|_| HttpError::Malformed("content-length"))?;
            if len > limits::MAX_BODY_BYTES {
                return Err(HttpError::TooLarge("body"));
            }
            let mut body = vec![0u8; len];
            reader.read_exact(&mut body).await?;
            body
        }
        None => Vec::new(),
    };

    Ok(Some(Request {
        method,
        path,
        query,
        headers,
        body,
    }))
}

fn parse_query(raw: &str) -> HashMap<String, String> {
    raw.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k), percent_decode(v)),
            None => (percent_decode(pair), String::new()),
        })
        .collect()
}

/// Decode %XX escapes and '+' in query components. Invalid escapes pass
/// through literally rather than failing the whole request. Works on raw
/// bytes throughout: the input is UTF-8 but escape positions need not
/// fall on char boundaries.
fn percent_decode(raw: &str) -> String {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' if i + 2 < bytes.len()
                && bytes[i + 1].is_ascii_hexdigit()
                && bytes[i + 2].is_ascii_hexdigit() =>
            {
                out.push(hex_digit(bytes[i + 1]) << 4 | hex_digit(bytes[i + 2]));
                i += 3;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_digit(b: u8) -> u8 {
    match b {
        b'0'..=b'9' => b - b'0',
        b'a'..=b'f' => b - b'a' + 10,
        b'A'..=b'F' => b - b'A' + 10,
        _ => 0,
    }
}

pub fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Write a JSON response. `close` controls the Connection header.
pub async fn write_response<W>(
    writer: &mut W,
    status: u16,
    body: &serde_json::Value,
    close: bool,
) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let payload = serde_json::to_vec(body).unwrap_or_default();
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
        status,
        status_text(status),
        payload.len(),
        if close { "close" } else { "keep-alive" },
    );
    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&payload).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    async fn parse(raw: &str) -> Result<Option<Request>, HttpError> {
        let mut reader = BufReader::new(raw.as_bytes());
        read_request(&mut reader).await
    }

    #[tokio::test]
    async fn parses_get_with_query() {
        let req = parse("GET /api/assignments?engineerId=abc&x=1+2 HTTP/1.1\r\nHost: h\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.path, "/api/assignments");
        assert_eq!(req.query.get("engineerId").unwrap(), "abc");
        assert_eq!(req.query.get("x").unwrap(), "1 2");
        assert!(req.body.is_empty());
    }

    #[tokio::test]
    async fn parses_post_with_body() {
        let raw = "POST /api/auth/login HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 13\r\n\r\n{\"email\":\"x\"}";
        let req = parse(raw).await.unwrap().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.body, b"{\"email\":\"x\"}");
    }

    #[tokio::test]
    async fn eof_before_request_is_none() {
        assert!(parse("").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn rejects_garbage_request_line() {
        assert!(matches!(
            parse("NOT-HTTP\r\n\r\n").await,
            Err(HttpError::Malformed(_))
        ));
    }

    #[tokio::test]
    async fn rejects_oversized_body() {
        let raw = format!(
            "POST /x HTTP/1.1\r\nContent-Length: {}\r\n\r\n",
            limits::MAX_BODY_BYTES + 1
        );
        assert!(matches!(
            parse(&raw).await,
            Err(HttpError::TooLarge("body"))
        ));
    }

    #[tokio::test]
    async fn header_names_lowercased() {
        let req = parse("GET / HTTP/1.1\r\nAuthorization: Bearer tok\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.header("authorization").unwrap(), "Bearer tok");
    }

    #[tokio::test]
    async fn connection_close_detected() {
        let req = parse("GET / HTTP/1.1\r\nConnection: close\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert!(req.wants_close());
    }

    #[tokio::test]
    async fn percent_decoding() {
        assert_eq!(percent_decode("a%20b"), "a b");
        assert_eq!(percent_decode("Node.js"), "Node.js");
        assert_eq!(percent_decode("bad%zz"), "bad%zz");
        assert_eq!(percent_decode("%C3%A9"), "é");
    }

    #[tokio::test]
    async fn percent_decoding_multibyte_after_escape() {
        // A '%' followed by multibyte UTF-8 puts the escape window off a
        // char boundary; the decoder must pass it through, not panic.
        assert_eq!(percent_decode("%%é"), "%%é");
        assert_eq!(percent_decode("a%éb"), "a%éb");
        assert_eq!(percent_decode("%é"), "%é");
    }

    #[tokio::test]
    async fn parses_query_with_multibyte_escape_garbage() {
        let req = parse("GET /api/projects?skills=%%é HTTP/1.1\r\nHost: h\r\n\r\n")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(req.query.get("skills").unwrap(), "%%é");
    }

    #[tokio::test]
    async fn response_framing() {
        let mut out = Vec::new();
        write_response(&mut out, 200, &serde_json::json!({"status": "OK"}), true)
            .await
            .unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Connection: close"));
        assert!(text.ends_with("{\"status\":\"OK\"}"));
    }
}
