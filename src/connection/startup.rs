//! The PostgreSQL startup/authentication handshake.
//!
//! Grounded on the teacher's `Server::startup` (full state machine reading
//! `Authentication*`, `ParameterStatus`, `BackendKeyData`, `ReadyForQuery`
//! messages) but playing the opposite role: the teacher authenticates
//! *incoming* clients, this drives an outgoing connection to a real
//! PostgreSQL backend, so every `Authentication*` branch here answers a
//! challenge instead of issuing one.

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::errors::Error;
use crate::messages::constants::*;
use crate::messages::scram::ScramClient;
use crate::messages::wire::*;

pub(crate) struct HandshakeResult {
    pub parameters: HashMap<String, String>,
    pub process_id: i32,
    pub secret_key: i32,
}

/// Send the StartupMessage, answer whichever authentication challenge the
/// server poses, then consume `ParameterStatus`/`BackendKeyData` until
/// `ReadyForQuery`.
pub(crate) async fn perform_handshake<S>(
    stream: &mut S,
    user: &str,
    password: &str,
    database: &str,
    application_name: &str,
    on_sent: impl FnOnce(),
) -> Result<HandshakeResult, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    write_all_flush(stream, &startup_message(user, database, application_name)).await?;
    on_sent();

    authenticate(stream, user, password).await?;

    let mut parameters = HashMap::new();
    let mut process_id = 0;
    let mut secret_key = 0;

    loop {
        let (code, body) = read_message(stream).await?;
        match code {
            backend::PARAMETER_STATUS => {
                let (key, value) = parse_parameter_status(body)?;
                parameters.insert(key, value);
            }
            backend::BACKEND_KEY_DATA => {
                let (pid, key) = parse_backend_key_data(body)?;
                process_id = pid;
                secret_key = key;
            }
            backend::NOTICE_RESPONSE => {
                // Informational only; the server may emit these before
                // ReadyForQuery (e.g. a deprecation warning). Ignored here,
                // same as the teacher's startup loop.
            }
            backend::ERROR_RESPONSE => {
                let err = parse_error_fields(body)?;
                return Err(Error::Server {
                    code: err.code,
                    message: err.message,
                    fatal: true,
                });
            }
            backend::READY_FOR_QUERY => {
                return Ok(HandshakeResult {
                    parameters,
                    process_id,
                    secret_key,
                });
            }
            backend::NEGOTIATE_PROTOCOL_VERSION => {
                // Server asked to negotiate down; we only ever speak 3.0 and
                // have sent no protocol extension parameters, so there is
                // nothing to renegotiate. Keep reading.
            }
            other => {
                return Err(Error::ProtocolSync(format!(
                    "unexpected message {:?} during startup",
                    other as char
                )))
            }
        }
    }
}

/// Consume the `Authentication*` message(s) and answer them, stopping once
/// `AuthenticationOk` arrives.
async fn authenticate<S>(stream: &mut S, user: &str, password: &str) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    loop {
        let (code, mut body) = read_message(stream).await?;
        if code == backend::ERROR_RESPONSE {
            let err = parse_error_fields(body)?;
            return Err(Error::Server {
                code: err.code,
                message: err.message,
                fatal: true,
            });
        }
        if code != backend::AUTHENTICATION {
            return Err(Error::ProtocolSync(format!(
                "expected an Authentication message, got {:?}",
                code as char
            )));
        }
        if body.len() < 4 {
            return Err(Error::ProtocolSync("Authentication message too short".into()));
        }
        let auth_type = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
        body = body.split_off(4);

        match auth_type {
            AUTHENTICATION_SUCCESSFUL => return Ok(()),
            AUTHENTICATION_CLEAR_PASSWORD => {
                let mut payload = password.as_bytes().to_vec();
                payload.push(0);
                stream
                    .write_all(&password_message(&payload))
                    .await
                    .map_err(|err| Error::Io(format!("write failed: {err}")))?;
                stream.flush().await.map_err(|err| Error::Io(format!("flush failed: {err}")))?;
            }
            MD5_ENCRYPTED_PASSWORD => {
                if body.len() < 4 {
                    return Err(Error::ProtocolSync("AuthenticationMD5Password missing salt".into()));
                }
                let salt = &body[..4];
                let hashed = md5_hash_password(user, password, salt);
                let mut payload = hashed.into_bytes();
                payload.push(0);
                write_all_flush(stream, &password_message(&payload)).await?;
            }
            SASL => {
                let mut offered = Vec::new();
                let mut rest = body;
                while let Some(mechanism) = read_cstring(&mut rest) {
                    if mechanism.is_empty() {
                        break;
                    }
                    offered.push(mechanism);
                }
                if !offered.iter().any(|m| m == SCRAM_SHA_256) {
                    return Err(Error::Auth(format!(
                        "server did not offer {SCRAM_SHA_256}, only: {offered:?}"
                    )));
                }
                run_scram(stream, password).await?;
            }
            other => {
                return Err(Error::Auth(format!(
                    "unsupported authentication method (code {other})"
                )))
            }
        }
    }
}

/// Drives the SASL/SCRAM-SHA-256 sub-exchange to completion (its own nested
/// `SASLContinue`/`SASLFinal` messages do not carry the outer `Authentication*`
/// framing check the caller's loop does, since the caller already dispatched
/// on `SASL` once).
async fn run_scram<S>(stream: &mut S, password: &str) -> Result<(), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut client = ScramClient::new(password);
    let first = client.client_first_message();

    let mut payload = BytesShim::new();
    payload.push_cstring(SCRAM_SHA_256);
    payload.push_i32(first.len() as i32);
    payload.push_bytes(first.as_bytes());
    write_all_flush(stream, &password_message(&payload.into_inner())).await?;

    let (code, body) = read_message(stream).await?;
    if code == backend::ERROR_RESPONSE {
        let err = parse_error_fields(body)?;
        return Err(Error::Server {
            code: err.code,
            message: err.message,
            fatal: true,
        });
    }
    if code != backend::AUTHENTICATION {
        return Err(Error::ProtocolSync("expected AuthenticationSASLContinue".into()));
    }
    let (auth_type, payload) = split_auth_payload(body)?;
    if auth_type != SASL_CONTINUE {
        return Err(Error::Auth(format!(
            "expected AuthenticationSASLContinue (11), got {auth_type}"
        )));
    }
    let server_first = String::from_utf8_lossy(&payload).into_owned();
    let client_final = client.handle_server_first(&server_first)?;
    write_all_flush(stream, &password_message(client_final.as_bytes())).await?;

    let (code, body) = read_message(stream).await?;
    if code == backend::ERROR_RESPONSE {
        let err = parse_error_fields(body)?;
        return Err(Error::Server {
            code: err.code,
            message: err.message,
            fatal: true,
        });
    }
    if code != backend::AUTHENTICATION {
        return Err(Error::ProtocolSync("expected AuthenticationSASLFinal".into()));
    }
    let (auth_type, payload) = split_auth_payload(body)?;
    if auth_type != SASL_FINAL {
        return Err(Error::Auth(format!(
            "expected AuthenticationSASLFinal (12), got {auth_type}"
        )));
    }
    let server_final = String::from_utf8_lossy(&payload).into_owned();
    client.verify_server_final(&server_final)?;

    // A final AuthenticationOk still follows SASLFinal; let the caller's
    // loop consume it on the next iteration.
    Ok(())
}

fn split_auth_payload(mut body: bytes::BytesMut) -> Result<(i32, bytes::BytesMut), Error> {
    use bytes::Buf;
    if body.len() < 4 {
        return Err(Error::ProtocolSync("Authentication message too short".into()));
    }
    let auth_type = body.get_i32();
    Ok((auth_type, body))
}

/// Tiny append-only byte builder for the SASLInitialResponse payload
/// (mechanism name, then a length-prefixed client-first-message), kept local
/// since nothing else in the wire module needs this exact shape.
struct BytesShim(bytes::BytesMut);

impl BytesShim {
    fn new() -> Self {
        BytesShim(bytes::BytesMut::new())
    }
    fn push_cstring(&mut self, s: &str) {
        use bytes::BufMut;
        self.0.put_slice(s.as_bytes());
        self.0.put_u8(0);
    }
    fn push_i32(&mut self, v: i32) {
        use bytes::BufMut;
        self.0.put_i32(v);
    }
    fn push_bytes(&mut self, b: &[u8]) {
        use bytes::BufMut;
        self.0.put_slice(b);
    }
    fn into_inner(self) -> bytes::BytesMut {
        self.0
    }
}
