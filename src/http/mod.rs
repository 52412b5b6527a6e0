//! HTTP/1.1 client built on the runtime's stream primitives.
//!
//! One request per connection: the client connects (blocking, with a
//! timeout), writes the request through a write watcher, reads the response
//! to EOF through a read watcher, and parses it. `Connection: close` is
//! always sent, so EOF frames the response.

mod request;
mod response;
mod url;

pub use response::{decode_chunked, encode_chunked, Response};
pub use url::{Scheme, Url};

use std::time::Duration;

use crate::error::Error;
use crate::net::Stream;

/// Options accepted by [`fetch`] and [`fetch_json`].
#[derive(Debug, Clone, PartialEq)]
pub struct FetchOptions {
    /// Request method; must be non-empty. Defaults to `GET`.
    pub method: String,
    /// Extra headers sent verbatim, in order.
    pub headers: Vec<(String, String)>,
    /// Request body; `None` is treated as empty.
    pub body: Option<String>,
    /// Whether to verify the TLS peer and peer name. Defaults to true.
    pub verify: bool,
    /// Connect timeout in seconds; must be finite and non-negative, zero
    /// meaning unbounded. Defaults to 30.
    pub connect_timeout: f64,
    /// Response size cap in bytes; must be positive. Defaults to 8,000,000.
    pub max_bytes: usize,
}

impl Default for FetchOptions {
    fn default() -> Self {
        FetchOptions {
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
            verify: true,
            connect_timeout: 30.0,
            max_bytes: 8_000_000,
        }
    }
}

impl FetchOptions {
    fn validate(&self) -> Result<(), Error> {
        if self.method.is_empty() {
            return Err(Error::bug("fetch method must be a non-empty string"));
        }
        if !self.connect_timeout.is_finite() || self.connect_timeout < 0.0 {
            return Err(Error::bug(
                "fetch connect_timeout must be a non-negative number of seconds",
            ));
        }
        if self.max_bytes == 0 {
            return Err(Error::bug("fetch max_bytes must be positive"));
        }

        Ok(())
    }
}

/// Performs one HTTP exchange and returns the parsed response.
///
/// Must be awaited inside a task. The connect step blocks the scheduler
/// thread (including name resolution and the TLS handshake); the request
/// write and the EOF-framed response read suspend cooperatively. Responses
/// with a status of 400 or above, responses larger than
/// `options.max_bytes`, and malformed responses all fail the exchange.
pub async fn fetch(url: &str, options: &FetchOptions) -> Result<Response, Error> {
    exchange(url, options, false).await
}

/// Like [`fetch`], but marks the request as a JSON request
/// (`Accept: application/json`) and parses the response body as JSON.
pub async fn fetch_json(url: &str, options: &FetchOptions) -> Result<serde_json::Value, Error> {
    let response = exchange(url, options, true).await?;

    serde_json::from_slice(&response.body)
        .map_err(|e| Error::Protocol(format!("invalid JSON body: {e}")))
}

async fn exchange(url: &str, options: &FetchOptions, json: bool) -> Result<Response, Error> {
    options.validate()?;
    let url = Url::parse(url)?;

    let stream = connect(&url, options)?;
    let request = request::build(&url, options, json);

    stream.write_all(request).await?;
    let raw = stream.read_all(options.max_bytes).await?;

    response::parse(&raw, url.as_str())
}

/// Blocking connect step; scheme picks the transport.
fn connect(url: &Url, options: &FetchOptions) -> Result<Stream, Error> {
    let timeout = Duration::try_from_secs_f64(options.connect_timeout)
        .map_err(|_| Error::bug("fetch connect_timeout out of range"))?;

    match url.scheme {
        Scheme::Http => Stream::connect(&url.host, url.port, timeout),
        #[cfg(feature = "tls")]
        Scheme::Https => Stream::connect_tls(&url.host, url.port, timeout, options.verify),
        #[cfg(not(feature = "tls"))]
        Scheme::Https => Err(Error::bug(
            "https URLs require the crate's `tls` feature",
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use super::*;
    use crate::combine::{race, Job};
    use crate::rt::{spawn, Runtime};

    /// Serves one canned HTTP response on a local listener, returning the
    /// URL to fetch.
    fn serve_once(response: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");

        thread::spawn(move || {
            let (mut socket, _) = listener.accept().expect("accept");

            // Read the request head before answering.
            let mut received = Vec::new();
            let mut buf = [0u8; 1024];
            loop {
                let n = socket.read(&mut buf).expect("peer read");
                if n == 0 {
                    break;
                }
                received.extend_from_slice(&buf[..n]);
                if received.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }

            socket.write_all(&response).expect("peer write");
            // Dropping the socket closes the connection, framing the body.
        });

        format!("http://127.0.0.1:{}/index", addr.port())
    }

    #[test]
    fn fetch_reads_a_plain_response() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\n\r\nhi there".to_vec());

        let rt = Runtime::new();
        let response = rt
            .block_on(async move { fetch(&url, &FetchOptions::default()).await })
            .unwrap();

        assert_eq!(response.status, Some(200));
        assert_eq!(response.text(), "hi there");
    }

    #[test]
    fn fetch_decodes_a_chunked_response() {
        let mut wire = b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n".to_vec();
        wire.extend_from_slice(&encode_chunked(b"streamed body", 4));
        let url = serve_once(wire);

        let rt = Runtime::new();
        let response = rt
            .block_on(async move { fetch(&url, &FetchOptions::default()).await })
            .unwrap();

        assert_eq!(response.body, b"streamed body");
    }

    #[test]
    fn fetch_raises_on_error_status() {
        let url = serve_once(b"HTTP/1.1 500 Oops\r\n\r\nbroken".to_vec());

        let rt = Runtime::new();
        let out = rt.block_on(async move { fetch(&url, &FetchOptions::default()).await });

        assert!(matches!(out, Err(Error::Status { status: 500, .. })));
    }

    #[test]
    fn fetch_enforces_the_response_cap() {
        let url = serve_once(b"HTTP/1.1 200 OK\r\n\r\nfar too large a body".to_vec());

        let rt = Runtime::new();
        let options = FetchOptions {
            max_bytes: 16,
            ..FetchOptions::default()
        };
        let out = rt.block_on(async move { fetch(&url, &options).await });

        assert_eq!(out, Err(Error::ResponseTooLarge));
    }

    #[test]
    fn fetch_json_parses_the_body() {
        let url = serve_once(
            b"HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{\"ok\":true,\"n\":3}"
                .to_vec(),
        );

        let rt = Runtime::new();
        let value = rt
            .block_on(async move { fetch_json(&url, &FetchOptions::default()).await })
            .unwrap();

        assert_eq!(value["ok"], serde_json::Value::Bool(true));
        assert_eq!(value["n"], serde_json::json!(3));
    }

    #[test]
    fn invalid_options_are_caller_bugs() {
        let rt = Runtime::new();

        for options in [
            FetchOptions {
                method: String::new(),
                ..FetchOptions::default()
            },
            FetchOptions {
                connect_timeout: -1.0,
                ..FetchOptions::default()
            },
            FetchOptions {
                connect_timeout: f64::NAN,
                ..FetchOptions::default()
            },
            FetchOptions {
                max_bytes: 0,
                ..FetchOptions::default()
            },
        ] {
            let out =
                rt.block_on(async move { fetch("http://example.com/", &options).await });
            assert!(matches!(out, Err(Error::CallerBug(_))), "accepted {out:?}");
        }
    }

    #[test]
    fn concurrent_fetches_share_one_scheduler() {
        let url_a = serve_once(b"HTTP/1.1 200 OK\r\n\r\nalpha".to_vec());
        let url_b = serve_once(b"HTTP/1.1 200 OK\r\n\r\nbeta".to_vec());

        let rt = Runtime::new();
        let _guard = rt.enter();

        let a = rt.queue(async move { fetch(&url_a, &FetchOptions::default()).await });
        let b = rt.queue(async move { fetch(&url_b, &FetchOptions::default()).await });

        rt.drive(|| a.is_done() && b.is_done()).unwrap();

        assert_eq!(a.result().unwrap().text(), "alpha");
        assert_eq!(b.result().unwrap().text(), "beta");
    }

    #[test]
    fn slow_server_loses_a_timeout_race() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("local addr");
        thread::spawn(move || {
            // Accept, then never answer; the client side should be torn
            // down by the losing race.
            let _socket = listener.accept();
            thread::sleep(std::time::Duration::from_millis(500));
        });
        let url = format!("http://127.0.0.1:{}/slow", addr.port());

        let rt = Runtime::new();
        let _guard = rt.enter();

        let work = spawn(async move {
            let response = fetch(&url, &FetchOptions::default()).await?;
            Ok(response.text().into_owned())
        })
        .unwrap();

        let out = race([
            Job::from(work),
            Job::future(async {
                crate::time::delay(0.05).await?;
                Err(Error::Timeout(0.05))
            }),
        ]);

        assert_eq!(out, Err(Error::Timeout(0.05)));
    }
}
