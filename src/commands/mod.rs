mod metrics;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tracing::{info, warn};

use crate::engine::ChatEngine;
use crate::protocol::{self, RequestHeader, Verb};
use crate::transport::Connection;

use self::metrics::{record_reply, record_request, snapshot};

pub fn execute_request(
    conn: &mut Connection,
    header: RequestHeader,
    payload: Vec<u8>,
    engine_state: &Arc<Mutex<Option<ChatEngine>>>,
    shutdown_requested: &Arc<AtomicBool>,
    client_id: usize,
) {
    let response = match header.verb {
        Verb::Ping => protocol::response_ok("PING", "PONG"),
        Verb::Converse => converse(&payload, engine_state, &header.caller, client_id),
        Verb::Status => status(engine_state),
        Verb::Shutdown => {
            info!(caller = %header.caller, client_id, "shutdown requested");
            shutdown_requested.store(true, Ordering::SeqCst);
            protocol::response_ok("SHUTDOWN", "shutting down")
        }
    };

    record_request(!response.starts_with(b"-"));
    conn.outbox.extend(response);
}

fn converse(
    payload: &[u8],
    engine_state: &Arc<Mutex<Option<ChatEngine>>>,
    caller: &str,
    client_id: usize,
) -> Vec<u8> {
    if payload.is_empty() {
        return protocol::response_err("EMPTY_MESSAGE", "converse requires a message payload");
    }

    let message = String::from_utf8_lossy(payload).to_string();
    let mut lock = engine_state.lock().unwrap();
    match lock.as_mut() {
        None => protocol::response_err("NO_MODEL", "no model loaded"),
        Some(engine) => {
            info!(caller, client_id, bytes = payload.len(), "converse request");
            match engine.respond(&message) {
                Ok(reply) => {
                    record_reply();
                    protocol::response_ok("CONVERSE", &reply)
                }
                Err(e) => {
                    warn!(caller, client_id, "generation failed: {:#}", e);
                    protocol::response_err("GENERATION", &format!("{:#}", e))
                }
            }
        }
    }
}

fn status(engine_state: &Arc<Mutex<Option<ChatEngine>>>) -> Vec<u8> {
    let model = match engine_state.lock().unwrap().as_ref() {
        Some(engine) => format!(
            "model_loaded=true family={:?} max_total_tokens={}",
            engine.family(),
            engine.generation().max_total_tokens
        ),
        None => "model_loaded=false".to_string(),
    };
    let (uptime_s, total_commands, total_errors, total_replies) = snapshot();

    let body = format!(
        "uptime_s={} total_commands={} total_errors={} total_replies={} {}",
        uptime_s, total_commands, total_errors, total_replies, model
    );
    protocol::response_ok("STATUS", &body)
}
