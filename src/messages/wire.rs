//! Frontend message builders and backend message readers.
//!
//! Grounded on the teacher's `messages::protocol` helpers (`simple_query`,
//! `startup`, `md5_hash_password`, error-message parsing) but trimmed to the
//! subset a client driver needs: we build frontend messages and parse
//! backend ones, whereas the teacher (acting as a server to its own clients)
//! does the reverse.

use std::collections::HashMap;

use bytes::{Buf, BufMut, BytesMut};
use md5::{Digest, Md5};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::Error;
use crate::messages::constants::*;

/// Build a StartupMessage.
pub fn startup_message(user: &str, database: &str, application_name: &str) -> BytesMut {
    let mut params = BytesMut::new();
    params.put_slice(b"user\0");
    params.put_slice(user.as_bytes());
    params.put_u8(0);
    params.put_slice(b"database\0");
    params.put_slice(database.as_bytes());
    params.put_u8(0);
    params.put_slice(b"application_name\0");
    params.put_slice(application_name.as_bytes());
    params.put_u8(0);
    params.put_u8(0); // terminator

    let len = params.len() as i32 + 4 + 4;
    let mut msg = BytesMut::with_capacity(len as usize);
    msg.put_i32(len);
    msg.put_i32(PROTOCOL_VERSION);
    msg.put(params);
    msg
}

/// Build a simple-query ('Q') frontend message.
pub fn simple_query(query: &str) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(query.len() + 6);
    bytes.put_u8(frontend::QUERY);
    bytes.put_i32(4 + query.len() as i32 + 1);
    bytes.put_slice(query.as_bytes());
    bytes.put_u8(0);
    bytes
}

/// Build a Terminate ('X') frontend message.
pub fn terminate() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(5);
    bytes.put_u8(frontend::TERMINATE);
    bytes.put_i32(4);
    bytes
}

/// Build a PasswordMessage ('p') frontend message carrying raw bytes (already
/// including any SASL framing the caller wants to send verbatim).
pub fn password_message(payload: &[u8]) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(payload.len() + 5);
    bytes.put_u8(frontend::PASSWORD);
    bytes.put_i32(4 + payload.len() as i32);
    bytes.put_slice(payload);
    bytes
}

/// Hash a password for `AuthenticationMD5Password`, PostgreSQL's two-pass
/// MD5 scheme: `"md5" + md5(md5(password + username) + salt)`.
pub fn md5_hash_password(user: &str, password: &str, salt: &[u8]) -> String {
    let mut md5 = Md5::new();
    md5.update(password.as_bytes());
    md5.update(user.as_bytes());
    let inner = md5.finalize_reset();

    md5.update(format!("{inner:x}"));
    md5.update(salt);
    format!("md5{:x}", md5.finalize())
}

/// Write a full buffer and flush, the way the teacher's `write_all_flush` does.
pub async fn write_all_flush<S>(stream: &mut S, buf: &[u8]) -> Result<(), Error>
where
    S: AsyncWrite + Unpin,
{
    stream
        .write_all(buf)
        .await
        .map_err(|err| Error::Io(format!("write failed: {err}")))?;
    stream
        .flush()
        .await
        .map_err(|err| Error::Io(format!("flush failed: {err}")))
}

/// Read exactly `n` bytes into a fresh buffer.
pub async fn read_exact<S>(stream: &mut S, n: usize) -> Result<BytesMut, Error>
where
    S: AsyncRead + Unpin,
{
    let mut buf = BytesMut::zeroed(n);
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|err| Error::Io(format!("read failed: {err}")))?;
    Ok(buf)
}

/// Read one backend message header (type byte + length, not including the
/// type byte itself), returning (type, body) where body excludes the 4-byte
/// length field.
pub async fn read_message<S>(stream: &mut S) -> Result<(u8, BytesMut), Error>
where
    S: AsyncRead + Unpin,
{
    let mut code = [0u8; 1];
    stream
        .read_exact(&mut code)
        .await
        .map_err(|err| Error::Io(format!("read message code failed: {err}")))?;
    let mut len_buf = [0u8; 4];
    stream
        .read_exact(&mut len_buf)
        .await
        .map_err(|err| Error::Io(format!("read message length failed: {err}")))?;
    let len = i32::from_be_bytes(len_buf);
    if len < 4 {
        return Err(Error::ProtocolSync(format!(
            "message length {len} is smaller than the 4-byte length field itself"
        )));
    }
    let body = read_exact(stream, (len - 4) as usize).await?;
    Ok((code[0], body))
}

/// Read a null-terminated C-string out of a buffer, advancing past the
/// terminator. Returns `None` if no terminator is found.
pub fn read_cstring(buf: &mut BytesMut) -> Option<String> {
    let pos = buf.iter().position(|&b| b == 0)?;
    let s = String::from_utf8_lossy(&buf[..pos]).into_owned();
    buf.advance(pos + 1);
    Some(s)
}

/// Parse an ErrorResponse/NoticeResponse field list into (severity, code,
/// message). Unknown fields are ignored.
pub fn parse_error_fields(mut body: BytesMut) -> Result<PgServerError, Error> {
    let mut severity = String::new();
    let mut code = String::new();
    let mut message = String::new();

    loop {
        if body.is_empty() {
            return Err(Error::ProtocolSync(
                "ErrorResponse field list missing terminator".into(),
            ));
        }
        let field_type = body.get_u8();
        if field_type == MESSAGE_TERMINATOR {
            break;
        }
        let Some(value) = read_cstring(&mut body) else {
            return Err(Error::ProtocolSync(
                "ErrorResponse field value is not nul-terminated".into(),
            ));
        };
        match field_type {
            b'S' => severity = value,
            b'C' => code = value,
            b'M' => message = value,
            _ => {}
        }
    }

    if message.is_empty() {
        return Err(Error::ProtocolSync("ErrorResponse has no message field".into()));
    }

    Ok(PgServerError {
        severity,
        code,
        message,
    })
}

/// A parsed `ErrorResponse`/`NoticeResponse`.
#[derive(Debug, Clone)]
pub struct PgServerError {
    pub severity: String,
    pub code: String,
    pub message: String,
}

/// Parse a `ParameterStatus` ('S') message body into (key, value).
pub fn parse_parameter_status(mut body: BytesMut) -> Result<(String, String), Error> {
    let key = read_cstring(&mut body)
        .ok_or_else(|| Error::ProtocolSync("ParameterStatus key missing terminator".into()))?;
    let value = read_cstring(&mut body)
        .ok_or_else(|| Error::ProtocolSync("ParameterStatus value missing terminator".into()))?;
    Ok((key, value))
}

/// Parse a `BackendKeyData` ('K') message body into (process_id, secret_key).
pub fn parse_backend_key_data(mut body: BytesMut) -> Result<(i32, i32), Error> {
    if body.len() < 8 {
        return Err(Error::ProtocolSync("BackendKeyData too short".into()));
    }
    Ok((body.get_i32(), body.get_i32()))
}

/// Parse a `RowDescription` ('T') message body into field names.
pub fn parse_row_description(mut body: BytesMut) -> Result<Vec<String>, Error> {
    if body.len() < 2 {
        return Err(Error::ProtocolSync("RowDescription too short".into()));
    }
    let count = body.get_i16() as usize;
    let mut names = Vec::with_capacity(count);
    for _ in 0..count {
        let name = read_cstring(&mut body)
            .ok_or_else(|| Error::ProtocolSync("RowDescription field name not terminated".into()))?;
        if body.len() < 18 {
            return Err(Error::ProtocolSync(
                "RowDescription field metadata truncated".into(),
            ));
        }
        body.advance(18); // table oid, column attno, type oid, type size, type modifier, format code
        names.push(name);
    }
    Ok(names)
}

/// Parse a `DataRow` ('D') message body into nullable string values.
pub fn parse_data_row(mut body: BytesMut) -> Result<Vec<Option<String>>, Error> {
    if body.len() < 2 {
        return Err(Error::ProtocolSync("DataRow too short".into()));
    }
    let count = body.get_i16() as usize;
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        if body.len() < 4 {
            return Err(Error::ProtocolSync("DataRow column length truncated".into()));
        }
        let len = body.get_i32();
        if len < 0 {
            values.push(None);
            continue;
        }
        let len = len as usize;
        if body.len() < len {
            return Err(Error::ProtocolSync("DataRow column value truncated".into()));
        }
        let value = String::from_utf8_lossy(&body[..len]).into_owned();
        body.advance(len);
        values.push(Some(value));
    }
    Ok(values)
}

/// Parse a `CommandComplete` ('C') message body into the command tag, e.g.
/// `"INSERT 0 1"` or `"SELECT 3"`.
pub fn parse_command_complete(mut body: BytesMut) -> Result<String, Error> {
    read_cstring(&mut body)
        .ok_or_else(|| Error::ProtocolSync("CommandComplete tag not terminated".into()))
}

/// Extract the affected-row count (`CmdTuples`) from a command tag, e.g.
/// `"INSERT 0 3"` -> 3, `"UPDATE 5"` -> 5, `"SELECT 10"` -> 10.
///
/// A command tag with no trailing numeric field (e.g. `"BEGIN"`, `"COMMIT"`)
/// has no affected-row count; callers only invoke this after requesting one,
/// per spec.md's "parse failure is an internal consistency error" rule.
pub fn parse_affected_rows(tag: &str) -> Result<u64, Error> {
    tag.rsplit(' ')
        .next()
        .and_then(|n| n.parse::<u64>().ok())
        .ok_or_else(|| {
            Error::ProtocolSync(format!(
                "command tag {tag:?} has no numeric affected-row count"
            ))
        })
}

/// Hex-escape arbitrary bytes in PostgreSQL's `bytea` hex format, wrapped as
/// an `E'...'` escape-string literal: `escape_blob([0x00,0xff]) == "E'\\x00ff'"`.
pub fn escape_blob(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len() * 2 + 6);
    out.push_str("E'\\x");
    for byte in data {
        out.push_str(&format!("{byte:02x}"));
    }
    out.push('\'');
    out
}

/// Reverse of the server's hex-format `bytea` output (`\x` followed by hex
/// pairs). Returns the input bytes unchanged if they are not hex-encoded
/// (older PostgreSQL versions use the escape format instead, but every
/// server since 9.0 defaults to hex).
pub fn unescape_bytea(text: &str) -> Result<Vec<u8>, Error> {
    let Some(hex) = text.strip_prefix("\\x") else {
        return Ok(text.as_bytes().to_vec());
    };
    if hex.len() % 2 != 0 {
        return Err(Error::ProtocolSync(format!(
            "bytea hex payload has odd length: {}",
            hex.len()
        )));
    }
    let mut out = Vec::with_capacity(hex.len() / 2);
    let bytes = hex.as_bytes();
    for chunk in bytes.chunks(2) {
        let s = std::str::from_utf8(chunk)
            .map_err(|_| Error::ProtocolSync("bytea hex payload is not ASCII".into()))?;
        let byte = u8::from_str_radix(s, 16)
            .map_err(|_| Error::ProtocolSync(format!("invalid bytea hex pair {s:?}")))?;
        out.push(byte);
    }
    Ok(out)
}

/// Scan a PostgreSQL key=value connect string for a `host=` token, the way
/// the teacher only ever parse-lights connect strings for log prefixes.
pub fn parse_host_label(connect_string: &str) -> Option<String> {
    parse_connect_params(connect_string).remove("host")
}

/// Loosely parse a `key=value key2=value2` connect string. Values containing
/// spaces may be single-quoted. This is intentionally forgiving: the crate
/// only ever needs `host` (for log prefixes) and, when present, `dbname`.
pub fn parse_connect_params(connect_string: &str) -> HashMap<String, String> {
    let mut result = HashMap::new();
    let mut chars = connect_string.chars().peekable();

    loop {
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        let mut key = String::new();
        while matches!(chars.peek(), Some(&c) if c != '=' && !c.is_whitespace()) {
            key.push(chars.next().unwrap());
        }
        if key.is_empty() {
            break;
        }
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }
        if chars.peek() != Some(&'=') {
            break;
        }
        chars.next();
        while matches!(chars.peek(), Some(c) if c.is_whitespace()) {
            chars.next();
        }

        let mut value = String::new();
        if chars.peek() == Some(&'\'') {
            chars.next();
            while let Some(&c) = chars.peek() {
                chars.next();
                if c == '\\' {
                    if let Some(&escaped) = chars.peek() {
                        value.push(escaped);
                        chars.next();
                    }
                    continue;
                }
                if c == '\'' {
                    break;
                }
                value.push(c);
            }
        } else {
            while matches!(chars.peek(), Some(c) if !c.is_whitespace()) {
                value.push(chars.next().unwrap());
            }
        }
        result.insert(key, value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_blob_matches_spec_example() {
        assert_eq!(escape_blob(&[0x00, 0xFF, 0x10]), "E'\\x00ff10'");
    }

    #[test]
    fn bytea_round_trip() {
        for sample in [&b""[..], b"\x00", b"\xff\xfe\x00\x01", b"hello world"] {
            let escaped = escape_blob(sample);
            let hex = escaped
                .strip_prefix("E'\\x")
                .and_then(|s| s.strip_suffix('\''))
                .unwrap();
            let unescaped = unescape_bytea(&format!("\\x{hex}")).unwrap();
            assert_eq!(unescaped, sample);
        }
    }

    #[test]
    fn host_label_extraction() {
        assert_eq!(
            parse_host_label("host=localhost dbname=x user=postgres"),
            Some("localhost".to_string())
        );
        assert_eq!(parse_host_label("dbname=x"), None);
        assert_eq!(
            parse_host_label("host='db.internal' dbname=x"),
            Some("db.internal".to_string())
        );
    }

    #[test]
    fn affected_rows_parsing() {
        assert_eq!(parse_affected_rows("INSERT 0 3").unwrap(), 3);
        assert_eq!(parse_affected_rows("UPDATE 5").unwrap(), 5);
        assert_eq!(parse_affected_rows("SELECT 10").unwrap(), 10);
        assert!(parse_affected_rows("BEGIN").is_err());
    }

    #[test]
    fn md5_password_hash_is_stable() {
        let hash = md5_hash_password("user", "password", &[1, 2, 3, 4]);
        assert!(hash.starts_with("md5"));
        assert_eq!(hash.len(), 35);
    }
}
