use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex};

use tracing::warn;

use crate::commands::execute_request;
use crate::engine::ChatEngine;
use crate::protocol::{self, RequestHeader};

pub enum FrameState {
    AwaitingHeader,
    ReadingPayload { header: RequestHeader },
}

pub enum ParsedRequest {
    Ok {
        header: RequestHeader,
        payload: Vec<u8>,
    },
    Err(String),
}

pub struct Connection {
    pub stream: mio::net::TcpStream,
    pub inbox: Vec<u8>,
    pub outbox: VecDeque<u8>,
    pub state: FrameState,
}

impl Connection {
    pub fn new(stream: mio::net::TcpStream) -> Self {
        Self {
            stream,
            inbox: Vec::with_capacity(4096),
            outbox: VecDeque::new(),
            state: FrameState::AwaitingHeader,
        }
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbox.is_empty()
    }
}

/// Splits whatever is buffered into complete requests, leaving partial
/// frames for the next read.
pub fn drain_requests(buffer: &mut Vec<u8>, state: &mut FrameState) -> Vec<ParsedRequest> {
    let mut parsed = Vec::new();

    loop {
        match state {
            FrameState::AwaitingHeader => {
                if let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                    let header_bytes = buffer.drain(..=pos).collect::<Vec<u8>>();
                    let header_line = String::from_utf8_lossy(&header_bytes).trim().to_string();
                    if header_line.is_empty() {
                        continue;
                    }

                    match RequestHeader::parse(&header_line) {
                        Ok(header) => {
                            if header.content_length == 0 {
                                parsed.push(ParsedRequest::Ok {
                                    header,
                                    payload: Vec::new(),
                                });
                            } else {
                                *state = FrameState::ReadingPayload { header };
                            }
                        }
                        Err(e) => parsed.push(ParsedRequest::Err(e)),
                    }
                } else {
                    break;
                }
            }
            FrameState::ReadingPayload { header } => {
                if buffer.len() >= header.content_length {
                    let payload = buffer.drain(..header.content_length).collect::<Vec<u8>>();
                    let header = header.clone();
                    parsed.push(ParsedRequest::Ok { header, payload });
                    *state = FrameState::AwaitingHeader;
                } else {
                    break;
                }
            }
        }
    }

    parsed
}

/// Returns true when the connection should be dropped.
pub fn handle_readable(
    conn: &mut Connection,
    engine_state: &Arc<Mutex<Option<ChatEngine>>>,
    shutdown_requested: &Arc<AtomicBool>,
    client_id: usize,
) -> bool {
    let mut chunk = [0; 4096];
    loop {
        match conn.stream.read(&mut chunk) {
            Ok(0) => return true,
            Ok(n) => {
                conn.inbox.extend_from_slice(&chunk[..n]);
                break;
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(ref e)
                if e.kind() == io::ErrorKind::ConnectionReset
                    || e.kind() == io::ErrorKind::BrokenPipe =>
            {
                return true;
            }
            Err(e) => {
                warn!(client_id, "read error: {}", e);
                return true;
            }
        }
    }

    let parsed = drain_requests(&mut conn.inbox, &mut conn.state);
    for request in parsed {
        match request {
            ParsedRequest::Ok { header, payload } => {
                execute_request(conn, header, payload, engine_state, shutdown_requested, client_id)
            }
            ParsedRequest::Err(e) => {
                conn.outbox.extend(protocol::response_err("BAD_HEADER", &e));
            }
        }
    }
    false
}

/// Flushes as much of the outbox as the socket accepts. Returns true when
/// the connection should be dropped.
pub fn handle_writable(conn: &mut Connection) -> bool {
    while !conn.outbox.is_empty() {
        let (head, _) = conn.outbox.as_slices();
        match conn.stream.write(head) {
            Ok(n) => {
                conn.outbox.drain(..n);
            }
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return false,
            Err(_) => return true,
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crate::engine::ChatEngine;

    use super::{
        drain_requests, handle_readable, handle_writable, Connection, FrameState, ParsedRequest,
    };

    fn setup_conn_and_peer() -> (Connection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind loopback listener");
        let addr = listener.local_addr().expect("listener local addr");

        let peer = TcpStream::connect(addr).expect("connect peer");
        peer.set_read_timeout(Some(Duration::from_secs(2)))
            .expect("set peer timeout");

        let (server_stream, _) = listener.accept().expect("accept stream");
        server_stream
            .set_nonblocking(true)
            .expect("set nonblocking");

        let mio_stream = mio::net::TcpStream::from_std(server_stream);
        (Connection::new(mio_stream), peer)
    }

    fn setup_shared_state() -> (Arc<Mutex<Option<ChatEngine>>>, Arc<AtomicBool>) {
        let engine_state: Arc<Mutex<Option<ChatEngine>>> = Arc::new(Mutex::new(None));
        let shutdown_requested = Arc::new(AtomicBool::new(false));
        (engine_state, shutdown_requested)
    }

    #[test]
    fn partial_header_waits_for_newline() {
        let mut state = FrameState::AwaitingHeader;
        let mut buffer = b"PING web 0".to_vec();

        let parsed = drain_requests(&mut buffer, &mut state);
        assert!(parsed.is_empty());
        assert!(!buffer.is_empty());
    }

    #[test]
    fn parses_payload_arriving_across_chunks() {
        let mut state = FrameState::AwaitingHeader;
        let mut buffer = b"CONVERSE web 5\nhe".to_vec();

        let parsed_first = drain_requests(&mut buffer, &mut state);
        assert!(parsed_first.is_empty());
        assert!(matches!(state, FrameState::ReadingPayload { .. }));

        buffer.extend_from_slice(b"llo");
        let parsed_second = drain_requests(&mut buffer, &mut state);
        assert_eq!(parsed_second.len(), 1);

        match &parsed_second[0] {
            ParsedRequest::Ok { payload, .. } => assert_eq!(payload, b"hello"),
            ParsedRequest::Err(e) => panic!("unexpected parse error: {e}"),
        }
    }

    #[test]
    fn parses_two_concatenated_requests() {
        let mut state = FrameState::AwaitingHeader;
        let mut buffer = b"PING web 0\nPING web 0\n".to_vec();

        let parsed = drain_requests(&mut buffer, &mut state);
        assert_eq!(parsed.len(), 2);
        assert!(buffer.is_empty());
        assert!(matches!(parsed[0], ParsedRequest::Ok { .. }));
        assert!(matches!(parsed[1], ParsedRequest::Ok { .. }));
    }

    #[test]
    fn invalid_header_reports_error_and_continues() {
        let mut state = FrameState::AwaitingHeader;
        let mut buffer = b"WHAT web 0\nPING web 0\n".to_vec();

        let parsed = drain_requests(&mut buffer, &mut state);
        assert_eq!(parsed.len(), 2);
        assert!(matches!(parsed[0], ParsedRequest::Err(_)));
        assert!(matches!(parsed[1], ParsedRequest::Ok { .. }));
    }

    #[test]
    fn tcp_ping_roundtrip() {
        let (mut conn, mut peer) = setup_conn_and_peer();
        let (engine_state, shutdown_requested) = setup_shared_state();

        peer.write_all(b"PING web 0\n").expect("write ping");

        let should_close = handle_readable(&mut conn, &engine_state, &shutdown_requested, 1);
        assert!(!should_close);
        assert!(conn.has_pending_output());

        let write_close = handle_writable(&mut conn);
        assert!(!write_close);

        let mut out = [0u8; 256];
        let n = peer.read(&mut out).expect("read ping response");
        let resp = String::from_utf8_lossy(&out[..n]);
        assert!(resp.starts_with("+OK PING 4\r\n"));
        assert!(resp.ends_with("PONG"));
    }

    #[test]
    fn tcp_partial_header_then_complete_header() {
        let (mut conn, mut peer) = setup_conn_and_peer();
        let (engine_state, shutdown_requested) = setup_shared_state();

        peer.write_all(b"PING we").expect("write chunk1");
        let _ = handle_readable(&mut conn, &engine_state, &shutdown_requested, 1);
        assert!(!conn.has_pending_output());

        peer.write_all(b"b 0\n").expect("write chunk2");
        let _ = handle_readable(&mut conn, &engine_state, &shutdown_requested, 1);
        let _ = handle_writable(&mut conn);

        let mut out = [0u8; 256];
        let n = peer.read(&mut out).expect("read response");
        let resp = String::from_utf8_lossy(&out[..n]);
        assert!(resp.starts_with("+OK PING 4\r\n"));
        assert!(resp.ends_with("PONG"));
    }

    #[test]
    fn tcp_invalid_header_then_valid_ping_same_stream() {
        let (mut conn, mut peer) = setup_conn_and_peer();
        let (engine_state, shutdown_requested) = setup_shared_state();

        peer.write_all(b"WHAT web 0\nPING web 0\n")
            .expect("write invalid+valid");
        let _ = handle_readable(&mut conn, &engine_state, &shutdown_requested, 1);
        let _ = handle_writable(&mut conn);

        let mut out = [0u8; 512];
        let n = peer.read(&mut out).expect("read combined responses");
        let resp = String::from_utf8_lossy(&out[..n]);
        assert!(resp.contains("-ERR BAD_HEADER"));
        assert!(resp.contains("+OK PING 4\r\nPONG"));
    }

    #[test]
    fn tcp_converse_without_model_reports_no_model() {
        let (mut conn, mut peer) = setup_conn_and_peer();
        let (engine_state, shutdown_requested) = setup_shared_state();

        peer.write_all(b"CONVERSE web 2\nhi").expect("write converse");
        let _ = handle_readable(&mut conn, &engine_state, &shutdown_requested, 1);
        let _ = handle_writable(&mut conn);

        let mut out = [0u8; 256];
        let n = peer.read(&mut out).expect("read converse response");
        let resp = String::from_utf8_lossy(&out[..n]);
        assert!(resp.starts_with("-ERR NO_MODEL"));
    }

    #[test]
    fn tcp_converse_with_empty_payload_is_rejected() {
        let (mut conn, mut peer) = setup_conn_and_peer();
        let (engine_state, shutdown_requested) = setup_shared_state();

        peer.write_all(b"CONVERSE web 0\n").expect("write converse");
        let _ = handle_readable(&mut conn, &engine_state, &shutdown_requested, 1);
        let _ = handle_writable(&mut conn);

        let mut out = [0u8; 256];
        let n = peer.read(&mut out).expect("read converse response");
        let resp = String::from_utf8_lossy(&out[..n]);
        assert!(resp.starts_with("-ERR EMPTY_MESSAGE"));
    }

    #[test]
    fn tcp_disconnect_requests_close() {
        let (mut conn, peer) = setup_conn_and_peer();
        let (engine_state, shutdown_requested) = setup_shared_state();

        drop(peer);

        let should_close = handle_readable(&mut conn, &engine_state, &shutdown_requested, 1);
        assert!(should_close);
    }

    #[test]
    fn tcp_multi_client_isolated_buffers() {
        let (mut conn_a, mut peer_a) = setup_conn_and_peer();
        let (mut conn_b, mut peer_b) = setup_conn_and_peer();
        let (engine_state, shutdown_requested) = setup_shared_state();

        peer_a.write_all(b"PING a 0\n").expect("write ping a");
        peer_b.write_all(b"PING b 0\n").expect("write ping b");

        let _ = handle_readable(&mut conn_a, &engine_state, &shutdown_requested, 1);
        let _ = handle_readable(&mut conn_b, &engine_state, &shutdown_requested, 2);

        let _ = handle_writable(&mut conn_a);
        let _ = handle_writable(&mut conn_b);

        let mut out_a = [0u8; 256];
        let n_a = peer_a.read(&mut out_a).expect("read response a");
        assert!(String::from_utf8_lossy(&out_a[..n_a]).contains("+OK PING 4\r\nPONG"));

        let mut out_b = [0u8; 256];
        let n_b = peer_b.read(&mut out_b).expect("read response b");
        assert!(String::from_utf8_lossy(&out_b[..n_b]).contains("+OK PING 4\r\nPONG"));
    }

    #[test]
    fn tcp_status_reports_counters() {
        let (mut conn, mut peer) = setup_conn_and_peer();
        let (engine_state, shutdown_requested) = setup_shared_state();

        peer.write_all(b"STATUS web 0\n").expect("write status");
        let should_close = handle_readable(&mut conn, &engine_state, &shutdown_requested, 1);
        assert!(!should_close);

        let _ = handle_writable(&mut conn);
        let mut out = [0u8; 512];
        let n = peer.read(&mut out).expect("read status response");
        let resp = String::from_utf8_lossy(&out[..n]);
        assert!(resp.starts_with("+OK STATUS"));
        assert!(resp.contains("total_commands="));
        assert!(resp.contains("model_loaded=false"));
    }

    #[test]
    fn tcp_shutdown_sets_flag() {
        let (mut conn, mut peer) = setup_conn_and_peer();
        let (engine_state, shutdown_requested) = setup_shared_state();

        peer.write_all(b"SHUTDOWN web 0\n").expect("write shutdown");
        let should_close = handle_readable(&mut conn, &engine_state, &shutdown_requested, 1);
        assert!(!should_close);

        let _ = handle_writable(&mut conn);
        let mut out = [0u8; 256];
        let n = peer.read(&mut out).expect("read shutdown response");
        let resp = String::from_utf8_lossy(&out[..n]);
        assert!(resp.starts_with("+OK SHUTDOWN"));
        assert!(shutdown_requested.load(Ordering::SeqCst));
    }
}
