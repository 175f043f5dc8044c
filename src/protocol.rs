//! Wire protocol for serve mode. One request is a single header line
//! `VERB caller content_length\n` followed by exactly `content_length`
//! payload bytes. Responses are `+OK CODE len\r\npayload` or
//! `-ERR CODE detail\r\n`.

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verb {
    Ping,
    Converse,
    Status,
    Shutdown,
}

#[derive(Debug, Clone)]
pub struct RequestHeader {
    pub verb: Verb,
    /// Free-form tag the caller picks for itself; echoed in logs only.
    pub caller: String,
    pub content_length: usize,
}

impl RequestHeader {
    pub fn parse(line: &str) -> Result<Self, String> {
        let parts: Vec<&str> = line.split_whitespace().collect();

        if parts.is_empty() {
            return Err("empty header".to_string());
        }

        let verb = match parts[0].to_uppercase().as_str() {
            "PING" => Verb::Ping,
            "CONVERSE" => Verb::Converse,
            "STATUS" => Verb::Status,
            "SHUTDOWN" => Verb::Shutdown,
            other => return Err(format!("unknown verb: {}", other)),
        };

        let caller = if parts.len() > 1 {
            parts[1].to_string()
        } else {
            "anon".to_string()
        };

        let content_length = if parts.len() > 2 {
            parts[2]
                .parse::<usize>()
                .map_err(|_| format!("invalid content length '{}'", parts[2]))?
        } else {
            0
        };

        Ok(RequestHeader {
            verb,
            caller,
            content_length,
        })
    }
}

pub fn response_ok(code: &str, payload: &str) -> Vec<u8> {
    let mut out = format!("+OK {} {}\r\n", code, payload.len()).into_bytes();
    out.extend_from_slice(payload.as_bytes());
    out
}

pub fn response_err(code: &str, detail: &str) -> Vec<u8> {
    format!("-ERR {} {}\r\n", code, detail).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::{response_err, response_ok, RequestHeader, Verb};

    #[test]
    fn parses_bare_ping() {
        let header = RequestHeader::parse("PING").expect("parse ping");
        assert_eq!(header.verb, Verb::Ping);
        assert_eq!(header.caller, "anon");
        assert_eq!(header.content_length, 0);
    }

    #[test]
    fn parses_converse_with_length() {
        let header = RequestHeader::parse("CONVERSE web 42").expect("parse converse");
        assert_eq!(header.verb, Verb::Converse);
        assert_eq!(header.caller, "web");
        assert_eq!(header.content_length, 42);
    }

    #[test]
    fn verb_is_case_insensitive() {
        let header = RequestHeader::parse("status cli").expect("parse status");
        assert_eq!(header.verb, Verb::Status);
    }

    #[test]
    fn rejects_unknown_verb_and_bad_length() {
        assert!(RequestHeader::parse("HELLO web 3").is_err());
        assert!(RequestHeader::parse("CONVERSE web x").is_err());
        assert!(RequestHeader::parse("").is_err());
    }

    #[test]
    fn ok_response_carries_payload_length() {
        let out = response_ok("PING", "PONG");
        assert_eq!(out, b"+OK PING 4\r\nPONG");
    }

    #[test]
    fn err_response_is_a_single_line() {
        let out = response_err("NO_MODEL", "no model loaded");
        assert_eq!(out, b"-ERR NO_MODEL no model loaded\r\n");
    }
}
