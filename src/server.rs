use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Error as E, Result};
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token};
use tracing::{info, warn};

use crate::engine::ChatEngine;
use crate::transport::{handle_readable, handle_writable, Connection};

const LISTENER: Token = Token(0);

/// Single-threaded readiness loop. Generation runs synchronously inside
/// request handling, so exactly one request is in flight at any time.
pub fn run(listen: &str, engine_state: Arc<Mutex<Option<ChatEngine>>>) -> Result<()> {
    let addr = listen
        .parse()
        .map_err(|_| E::msg(format!("invalid listen address '{}'", listen)))?;

    let mut poll = Poll::new()?;
    let mut events = Events::with_capacity(128);
    let mut listener = TcpListener::bind(addr)?;
    poll.registry()
        .register(&mut listener, LISTENER, Interest::READABLE)?;

    let mut connections: HashMap<Token, Connection> = HashMap::new();
    let mut next_token = Token(LISTENER.0 + 1);
    let shutdown_requested = Arc::new(AtomicBool::new(false));

    info!(%addr, "serving single-turn requests");

    while !shutdown_requested.load(Ordering::SeqCst) {
        // Short timeout so a SHUTDOWN issued on one connection is observed
        // without waiting for further traffic.
        poll.poll(&mut events, Some(Duration::from_millis(200)))?;

        for event in events.iter() {
            match event.token() {
                LISTENER => loop {
                    match listener.accept() {
                        Ok((mut stream, peer_addr)) => {
                            let token = next_token;
                            next_token.0 += 1;
                            info!(client_id = token.0, %peer_addr, "connection accepted");
                            poll.registry().register(
                                &mut stream,
                                token,
                                Interest::READABLE,
                            )?;
                            connections.insert(token, Connection::new(stream));
                        }
                        Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                        Err(e) => warn!("accept error: {}", e),
                    }
                },
                token => {
                    if let Some(conn) = connections.get_mut(&token) {
                        let mut should_close = false;

                        if event.is_readable()
                            && handle_readable(conn, &engine_state, &shutdown_requested, token.0)
                        {
                            should_close = true;
                        }
                        if event.is_writable() && handle_writable(conn) {
                            should_close = true;
                        }

                        if should_close {
                            info!(client_id = token.0, "connection closed");
                            connections.remove(&token);
                        } else {
                            let interest = if conn.has_pending_output() {
                                Interest::READABLE | Interest::WRITABLE
                            } else {
                                Interest::READABLE
                            };
                            poll.registry()
                                .reregister(&mut conn.stream, token, interest)?;
                        }
                    }
                }
            }
        }
    }

    info!("shutdown flag set; leaving serve loop");
    Ok(())
}
