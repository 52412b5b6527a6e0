use std::borrow::Cow;

use crate::error::Error;

/// A parsed HTTP response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code, when the header segment carried a recognizable status
    /// line. Responses with unrecognizable status lines are passed through
    /// with no status known.
    pub status: Option<u16>,
    /// The raw header segment, up to the blank line.
    pub head: String,
    /// The response body, chunked-decoded when the headers asked for it.
    pub body: Vec<u8>,
}

impl Response {
    /// The body as text, with invalid UTF-8 replaced.
    pub fn text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.body)
    }
}

/// Parses a raw EOF-framed response.
///
/// Splits at the first `\r\n\r\n` (absence is a protocol failure), scans the
/// header segment for a status line, raises on status >= 400, and decodes
/// the body when the headers declare `Transfer-Encoding: chunked`
/// (case-insensitive); otherwise the body is the remainder verbatim.
pub(crate) fn parse(raw: &[u8], url: &str) -> Result<Response, Error> {
    let split = find(raw, b"\r\n\r\n")
        .ok_or_else(|| Error::Protocol("missing header terminator".into()))?;

    let head = String::from_utf8_lossy(&raw[..split]).into_owned();
    let remainder = &raw[split + 4..];

    let status = scan_status(&head);
    if let Some(code) = status {
        if code >= 400 {
            return Err(Error::Status {
                status: code,
                url: url.to_string(),
            });
        }
    }

    let body = if declares_chunked(&head) {
        decode_chunked(remainder)?
    } else {
        remainder.to_vec()
    };

    Ok(Response { status, head, body })
}

/// First occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Scans the header segment for `HTTP/1.0` or `HTTP/1.1` followed by
/// whitespace and three digits, case-insensitively, anywhere in the segment.
///
/// Deliberately permissive: a response whose status line does not match is
/// treated as carrying no status rather than rejected, and its body still
/// parses.
fn scan_status(head: &str) -> Option<u16> {
    let lower = head.to_ascii_lowercase();
    let bytes = lower.as_bytes();

    let mut from = 0;
    while let Some(found) = lower[from..].find("http/1.") {
        let at = from + found;
        from = at + 1;

        let rest = &bytes[at + "http/1.".len()..];
        if !matches!(rest.first(), Some(b'0') | Some(b'1')) {
            continue;
        }

        let mut cursor = &rest[1..];
        let mut skipped = 0;
        while let Some(c) = cursor.first() {
            if !c.is_ascii_whitespace() {
                break;
            }
            cursor = &cursor[1..];
            skipped += 1;
        }

        if skipped == 0 || cursor.len() < 3 {
            continue;
        }

        let digits = &cursor[..3];
        if digits.iter().all(u8::is_ascii_digit) {
            return Some(
                digits
                    .iter()
                    .fold(0u16, |code, &d| code * 10 + u16::from(d - b'0')),
            );
        }
    }

    None
}

/// Whether the header segment declares a chunked transfer encoding.
fn declares_chunked(head: &str) -> bool {
    head.to_ascii_lowercase()
        .contains("transfer-encoding: chunked")
}

/// Decodes a chunked transfer-encoded body.
///
/// Each chunk is a CRLF-terminated hexadecimal size line (an optional
/// `;extension` is ignored, surrounding whitespace trimmed) followed by that
/// many data bytes and exactly CRLF. A zero size enters trailer mode: lines
/// are consumed until an empty one, and any bytes after the terminating
/// empty line are a malformed trailer.
pub fn decode_chunked(body: &[u8]) -> Result<Vec<u8>, Error> {
    let mut decoded = Vec::new();
    let mut pos = 0;

    loop {
        let line_end = find(&body[pos..], b"\r\n")
            .ok_or_else(|| Error::Protocol("chunk size line missing CRLF".into()))?;
        let line = &body[pos..pos + line_end];
        pos += line_end + 2;

        let line = String::from_utf8_lossy(line);
        let size_text = line
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string();
        let size = usize::from_str_radix(&size_text, 16)
            .map_err(|_| Error::Protocol(format!("invalid chunk size {size_text:?}")))?;

        if size == 0 {
            // Trailer mode: consume lines until an empty one.
            loop {
                let trailer_end = find(&body[pos..], b"\r\n")
                    .ok_or_else(|| Error::Protocol("trailer line missing CRLF".into()))?;
                let trailer = &body[pos..pos + trailer_end];
                pos += trailer_end + 2;

                if trailer.is_empty() {
                    if pos != body.len() {
                        return Err(Error::Protocol("bytes after final trailer".into()));
                    }
                    return Ok(decoded);
                }
            }
        }

        // The size came off the wire; checked arithmetic keeps an absurd
        // declaration from overflowing the cursor.
        let data_end = pos
            .checked_add(size)
            .and_then(|end| end.checked_add(2))
            .filter(|&end| end <= body.len())
            .ok_or_else(|| Error::Protocol("chunk data truncated".into()))?;

        decoded.extend_from_slice(&body[pos..data_end - 2]);

        if &body[data_end - 2..data_end] != b"\r\n" {
            return Err(Error::Protocol("chunk data missing trailing CRLF".into()));
        }
        pos = data_end;
    }
}

/// Encodes `data` as a chunked transfer-encoded body with chunks of at most
/// `chunk_size` bytes. The inverse of [`decode_chunked`]; used by tests and
/// demo servers to build wire fixtures.
pub fn encode_chunked(data: &[u8], chunk_size: usize) -> Vec<u8> {
    let chunk_size = chunk_size.max(1);
    let mut encoded = Vec::new();

    for chunk in data.chunks(chunk_size) {
        encoded.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        encoded.extend_from_slice(chunk);
        encoded.extend_from_slice(b"\r\n");
    }

    encoded.extend_from_slice(b"0\r\n\r\n");
    encoded
}
