//! Listener transport for the RPC server.
//!
//! Parses the URI prefix, binds the TCP listener, and runs the accept loop.
//! Connections are handled one at a time, in accept order: log the request
//! target, write the fixed `501 Not Implemented` response, close. Accept
//! failures are absorbed; only the shutdown signal ends the loop.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::time::timeout;

use super::ServerError;
use super::log_channel::{LogChannel, LogSeverity};

/// Bound on reading one request head; a stalled client is dropped so it
/// cannot wedge the sequential loop.
const REQUEST_READ_TIMEOUT: Duration = Duration::from_secs(5);

const NOT_IMPLEMENTED_RESPONSE: &[u8] =
    b"HTTP/1.1 501 Not Implemented\r\nContent-Length: 0\r\nConnection: close\r\n\r\n";

/// An `http://host:port/` listener prefix.
///
/// `+` and `*` hosts follow the HttpListener wildcard convention and bind
/// the unspecified address; a missing port defaults to 80.
#[derive(Debug, Clone)]
pub(super) struct UriPrefix {
    authority: String,
}

impl UriPrefix {
    pub(super) fn parse(raw: &str) -> Result<Self, ServerError> {
        let invalid = |reason: &'static str| ServerError::InvalidPrefix {
            prefix: raw.to_string(),
            reason,
        };

        let rest = raw
            .strip_prefix("http://")
            .ok_or_else(|| invalid("only the http scheme is supported"))?;
        let authority = rest.split('/').next().unwrap_or_default();
        if authority.is_empty() {
            return Err(invalid("missing host"));
        }

        let (host, port) = if authority.ends_with(']') {
            // Bracketed IPv6 literal without an explicit port
            (authority, 80)
        } else if let Some((host, port)) = authority.rsplit_once(':') {
            let port: u16 = port.parse().map_err(|_| invalid("port is not a number"))?;
            (host, port)
        } else {
            (authority, 80)
        };
        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        let host = match host {
            "+" | "*" => "0.0.0.0",
            other => other,
        };

        Ok(Self {
            authority: format!("{host}:{port}"),
        })
    }

    pub(super) fn authority(&self) -> &str {
        &self.authority
    }

    /// Acquire the listening socket.
    pub(super) async fn bind(&self) -> Result<TcpListener, ServerError> {
        TcpListener::bind(&self.authority)
            .await
            .map_err(|source| ServerError::Bind {
                addr: self.authority.clone(),
                source,
            })
    }
}

/// Source of accepted connections for the loop.
///
/// Factored out of [`accept_loop`] so accept faults can be injected in
/// tests; production code always runs against [`TcpListener`].
pub(super) trait Acceptor {
    async fn accept(&mut self) -> io::Result<TcpStream>;
}

impl Acceptor for TcpListener {
    async fn accept(&mut self) -> io::Result<TcpStream> {
        TcpListener::accept(self).await.map(|(stream, _peer)| stream)
    }
}

/// Accept connections until the shutdown signal arrives.
///
/// Accept and per-connection failures are logged at Warning severity and
/// never end the loop. Emits the stopped event on exit.
pub(super) async fn accept_loop<A: Acceptor>(
    mut acceptor: A,
    channel: LogChannel,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            accept_result = acceptor.accept() => {
                match accept_result {
                    Ok(stream) => {
                        if let Err(e) = answer_connection(stream, &channel).await {
                            channel.emit(
                                LogSeverity::Warning,
                                format!("Failed to answer connection: {e}"),
                            );
                        }
                    }
                    Err(e) => {
                        channel.emit(
                            LogSeverity::Warning,
                            format!("Failed to accept connection: {e}"),
                        );
                    }
                }
            }
            _ = shutdown.recv() => break,
        }
    }

    channel.emit(LogSeverity::Information, "RPC server stopped.");
}

/// Log the request target, answer with the fixed 501 response, close.
async fn answer_connection(stream: TcpStream, channel: &LogChannel) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let request_line = timeout(REQUEST_READ_TIMEOUT, read_request_head(&mut reader))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "timed out reading request"))??;

    channel.emit(LogSeverity::Information, request_target(&request_line));

    writer.write_all(NOT_IMPLEMENTED_RESPONSE).await?;
    writer.shutdown().await?;

    Ok(())
}

/// Read the request line, then drain the header section so the peer never
/// sees a reset before it has read the response.
async fn read_request_head(
    reader: &mut BufReader<tokio::net::tcp::OwnedReadHalf>,
) -> io::Result<String> {
    let mut request_line = String::new();
    let bytes_read = reader.read_line(&mut request_line).await?;
    if bytes_read == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed before a request line",
        ));
    }

    let mut line = String::new();
    loop {
        line.clear();
        let bytes_read = reader.read_line(&mut line).await?;
        if bytes_read == 0 || line == "\r\n" || line == "\n" {
            break;
        }
    }

    Ok(request_line)
}

/// Extract the raw target from an HTTP request line (`GET /path HTTP/1.1`).
fn request_target(request_line: &str) -> String {
    request_line
        .split_whitespace()
        .nth(1)
        .unwrap_or("-")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_host_and_port() {
        let prefix = UriPrefix::parse("http://localhost:9090/").unwrap();
        assert_eq!(prefix.authority(), "localhost:9090");
    }

    #[test]
    fn parse_defaults_the_port_to_80() {
        let prefix = UriPrefix::parse("http://localhost/").unwrap();
        assert_eq!(prefix.authority(), "localhost:80");
    }

    #[test]
    fn parse_maps_wildcard_hosts_to_unspecified() {
        let plus = UriPrefix::parse("http://+:8080/").unwrap();
        assert_eq!(plus.authority(), "0.0.0.0:8080");

        let star = UriPrefix::parse("http://*:8080/").unwrap();
        assert_eq!(star.authority(), "0.0.0.0:8080");
    }

    #[test]
    fn parse_tolerates_a_missing_trailing_slash() {
        let prefix = UriPrefix::parse("http://127.0.0.1:9090").unwrap();
        assert_eq!(prefix.authority(), "127.0.0.1:9090");
    }

    #[test]
    fn parse_rejects_other_schemes() {
        let err = UriPrefix::parse("https://localhost:9090/").unwrap_err();
        assert!(matches!(err, ServerError::InvalidPrefix { .. }));
    }

    #[test]
    fn parse_rejects_missing_host() {
        assert!(UriPrefix::parse("http:///").is_err());
        assert!(UriPrefix::parse("http://:9090/").is_err());
    }

    #[test]
    fn parse_rejects_garbage_ports() {
        assert!(UriPrefix::parse("http://localhost:abc/").is_err());
        assert!(UriPrefix::parse("http://localhost:99999/").is_err());
    }

    #[test]
    fn target_comes_from_the_request_line() {
        assert_eq!(request_target("GET /anything HTTP/1.1\r\n"), "/anything");
        assert_eq!(request_target("POST /a/b?x=1 HTTP/1.1\r\n"), "/a/b?x=1");
    }

    #[test]
    fn target_falls_back_when_the_line_is_malformed() {
        assert_eq!(request_target("garbage\r\n"), "-");
        assert_eq!(request_target(""), "-");
    }

    /// Delegates to a real listener after failing the first accept.
    struct FlakyAcceptor {
        listener: TcpListener,
        fail_first: bool,
    }

    impl Acceptor for FlakyAcceptor {
        async fn accept(&mut self) -> io::Result<TcpStream> {
            if self.fail_first {
                self.fail_first = false;
                return Err(io::Error::new(
                    io::ErrorKind::ConnectionAborted,
                    "connection aborted",
                ));
            }
            Acceptor::accept(&mut self.listener).await
        }
    }

    #[tokio::test]
    async fn transient_accept_failure_is_logged_and_survived() {
        use std::sync::{Arc, Mutex};
        use tokio::io::AsyncReadExt;

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let addr = listener.local_addr().expect("local addr");

        let channel = LogChannel::new();
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        channel.subscribe(move |event| {
            sink.lock().unwrap().push((event.severity, event.message.clone()));
        });

        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let acceptor = FlakyAcceptor {
            listener,
            fail_first: true,
        };
        let loop_task = tokio::spawn(accept_loop(acceptor, channel, shutdown_rx));

        // The injected failure happens before this connection is accepted;
        // the loop must absorb it and still answer.
        let mut stream = TcpStream::connect(addr).await.expect("connect");
        stream
            .write_all(b"GET /after-failure HTTP/1.1\r\n\r\n")
            .await
            .expect("write");
        let mut response = String::new();
        timeout(Duration::from_secs(5), stream.read_to_string(&mut response))
            .await
            .expect("timeout waiting for response")
            .expect("read");
        assert!(response.starts_with("HTTP/1.1 501"));

        shutdown_tx.send(()).expect("signal shutdown");
        loop_task.await.expect("loop exit");

        let events = events.lock().unwrap();
        assert!(
            events
                .iter()
                .any(|(severity, message)| *severity == LogSeverity::Warning
                    && message.contains("Failed to accept connection")),
            "expected an accept warning: {events:?}"
        );
        assert!(
            events
                .iter()
                .any(|(severity, message)| *severity == LogSeverity::Information
                    && message == "/after-failure")
        );
    }
}
