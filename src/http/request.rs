use crate::http::url::Url;
use crate::http::FetchOptions;

/// Assembles the outgoing request bytes.
///
/// The request line is `{METHOD} {path}[?query] HTTP/1.1`, followed by the
/// `Host` header, the caller's headers verbatim, and `Connection: close`
/// (every exchange is one request, one EOF-framed response). A
/// `Content-Length` is synthesized for non-empty bodies unless the caller
/// already supplied one (case-insensitive); JSON requests additionally get
/// `Accept: application/json` unless the caller set their own.
pub(crate) fn build(url: &Url, options: &FetchOptions, json: bool) -> Vec<u8> {
    let body = options.body.as_deref().unwrap_or("");

    let mut head = format!(
        "{} {} HTTP/1.1\r\nHost: {}\r\n",
        options.method,
        url.request_target(),
        url.host_header(),
    );

    for (name, value) in &options.headers {
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str("\r\n");
    }

    head.push_str("Connection: close\r\n");

    if !body.is_empty() && !has_header(options, "content-length") {
        head.push_str(&format!("Content-Length: {}\r\n", body.len()));
    }

    if json && !has_header(options, "accept") {
        head.push_str("Accept: application/json\r\n");
    }

    head.push_str("\r\n");

    let mut request = head.into_bytes();
    request.extend_from_slice(body.as_bytes());
    request
}

fn has_header(options: &FetchOptions, name: &str) -> bool {
    options
        .headers
        .iter()
        .any(|(header, _)| header.eq_ignore_ascii_case(name))
}
