//! Client-side SCRAM-SHA-256 (RFC 5802 / RFC 7677), no channel binding.
//!
//! The teacher authenticates SCRAM as the *server* side of the handshake
//! (`auth::authenticate_with_scram`, driving `auth::scram`). This driver
//! plays the client side instead, since it is the one connecting to a real
//! PostgreSQL backend. Grounded on the same RFC the teacher's SCRAM module
//! implements, using the same `hmac`/`sha2` crates from its dependency stack.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::{Hmac, Mac};
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::errors::Error;

type HmacSha256 = Hmac<Sha256>;

/// Drives one client-side SCRAM-SHA-256 exchange.
pub struct ScramClient {
    username_ignored_by_server: String,
    password: String,
    client_nonce: String,
    client_first_bare: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    pub fn new(password: &str) -> Self {
        let client_nonce: String = {
            let mut rng = rand::rng();
            (0..24)
                .map(|_| {
                    const CHARS: &[u8] =
                        b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
                    CHARS[rng.random_range(0..CHARS.len())] as char
                })
                .collect()
        };
        ScramClient {
            username_ignored_by_server: String::new(),
            password: stringprep::saslprep(password)
                .map(|s| s.into_owned())
                .unwrap_or_else(|_| password.to_string()),
            client_nonce,
            client_first_bare: String::new(),
            server_signature: None,
        }
    }

    /// Builds the `client-first-message` sent as the `SASLInitialResponse`
    /// payload (mechanism name framed separately by the caller).
    pub fn client_first_message(&mut self) -> String {
        self.client_first_bare = format!("n={},r={}", self.username_ignored_by_server, self.client_nonce);
        format!("n,,{}", self.client_first_bare)
    }

    /// Consumes the server's `server-first-message` (from `SASLContinue`)
    /// and returns the `client-final-message` to send back.
    pub fn handle_server_first(&mut self, server_first: &str) -> Result<String, Error> {
        let fields = parse_scram_fields(server_first);
        let server_nonce = fields
            .get("r")
            .ok_or_else(|| Error::Auth("SCRAM server-first message missing nonce".into()))?;
        if !server_nonce.starts_with(&self.client_nonce) {
            return Err(Error::Auth(
                "SCRAM server nonce does not extend client nonce".into(),
            ));
        }
        let salt_b64 = fields
            .get("s")
            .ok_or_else(|| Error::Auth("SCRAM server-first message missing salt".into()))?;
        let iterations: u32 = fields
            .get("i")
            .ok_or_else(|| Error::Auth("SCRAM server-first message missing iteration count".into()))?
            .parse()
            .map_err(|_| Error::Auth("SCRAM iteration count is not a number".into()))?;
        let salt = BASE64
            .decode(salt_b64)
            .map_err(|err| Error::Auth(format!("SCRAM salt is not valid base64: {err}")))?;

        let salted_password = hi(self.password.as_bytes(), &salt, iterations);
        let client_key = hmac_sha256(&salted_password, b"Client Key");
        let stored_key = sha256(&client_key);

        let channel_binding = BASE64.encode("n,,");
        let client_final_without_proof = format!("c={channel_binding},r={server_nonce}");

        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_signature = hmac_sha256(&stored_key, auth_message.as_bytes());
        let client_proof: Vec<u8> = client_key
            .iter()
            .zip(client_signature.iter())
            .map(|(a, b)| a ^ b)
            .collect();

        let server_key = hmac_sha256(&salted_password, b"Server Key");
        self.server_signature = Some(hmac_sha256(&server_key, auth_message.as_bytes()));

        Ok(format!(
            "{client_final_without_proof},p={}",
            BASE64.encode(client_proof)
        ))
    }

    /// Verifies the server's `server-final-message` (from `SASLFinal`)
    /// matches the signature we computed, proving the server knows the
    /// stored key (mutual authentication).
    pub fn verify_server_final(&self, server_final: &str) -> Result<(), Error> {
        let fields = parse_scram_fields(server_final);
        if let Some(err) = fields.get("e") {
            return Err(Error::Auth(format!("SCRAM server reported error: {err}")));
        }
        let v = fields
            .get("v")
            .ok_or_else(|| Error::Auth("SCRAM server-final message missing verifier".into()))?;
        let got = BASE64
            .decode(v)
            .map_err(|err| Error::Auth(format!("SCRAM server signature is not valid base64: {err}")))?;
        let expected = self
            .server_signature
            .as_ref()
            .ok_or_else(|| Error::Auth("SCRAM verify called before server-first was processed".into()))?;
        if &got != expected {
            return Err(Error::Auth(
                "SCRAM server signature mismatch: possible man-in-the-middle".into(),
            ));
        }
        Ok(())
    }
}

fn parse_scram_fields(message: &str) -> std::collections::HashMap<String, String> {
    message
        .split(',')
        .filter_map(|kv| kv.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

fn hmac_sha256(key: &[u8], data: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(key).expect("HMAC accepts keys of any length");
    mac.update(data);
    mac.finalize().into_bytes().to_vec()
}

fn sha256(data: &[u8]) -> Vec<u8> {
    Sha256::digest(data).to_vec()
}

/// `Hi(password, salt, iterations)` from RFC 5802: `U1 = HMAC(password, salt
/// || INT(1))`, `Ui = HMAC(password, U(i-1))`, result = XOR of all `Ui`.
fn hi(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut salt_block = salt.to_vec();
    salt_block.extend_from_slice(&1u32.to_be_bytes());

    let mut u = hmac_sha256(password, &salt_block);
    let mut result = u.clone();
    for _ in 1..iterations {
        u = hmac_sha256(password, &u);
        for (r, b) in result.iter_mut().zip(u.iter()) {
            *r ^= b;
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn client_first_message_has_gs2_header() {
        let mut client = ScramClient::new("secret");
        let first = client.client_first_message();
        assert!(first.starts_with("n,,n="));
        assert!(first.contains(&client.client_nonce));
    }

    #[test]
    fn hi_is_deterministic() {
        let a = hi(b"password", b"salt", 4096);
        let b = hi(b"password", b"salt", 4096);
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }
}
