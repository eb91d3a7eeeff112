//! SASL mechanisms supported by the admin client.
//!
//! librdkafka authenticates its own connections. The raw protocol connection
//! used for DescribeLogDirs (see [`crate::protocol`]) authenticates with the
//! helpers here: the PLAIN token and a SCRAM client (RFC 5802, RFC 7677).

use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::str::FromStr;

/// A supported SASL mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaslMechanism {
    /// PLAIN (RFC 4616)
    Plain,
    /// SCRAM-SHA-256
    ScramSha256,
    /// SCRAM-SHA-512
    ScramSha512,
}

impl SaslMechanism {
    /// Canonical mechanism name, as sent in SaslHandshake and to librdkafka.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::ScramSha256 => "SCRAM-SHA-256",
            Self::ScramSha512 => "SCRAM-SHA-512",
        }
    }
}

impl FromStr for SaslMechanism {
    type Err = Error;

    /// Case-insensitive parse.
    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "SCRAM-SHA-256" => Ok(Self::ScramSha256),
            "SCRAM-SHA-512" => Ok(Self::ScramSha512),
            other => Err(Error::UnsupportedMechanism(other.to_string())),
        }
    }
}

impl fmt::Display for SaslMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A validated SASL credential.
#[derive(Clone, PartialEq, Eq)]
pub struct SaslCredentials {
    /// Mechanism
    pub mechanism: SaslMechanism,
    /// Username
    pub username: String,
    /// Password
    pub password: String,
}

impl fmt::Debug for SaslCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaslCredentials")
            .field("mechanism", &self.mechanism)
            .field("username", &self.username)
            .field("password", &"****")
            .finish()
    }
}

/// PLAIN initial response: `\0username\0password`.
pub fn plain_token(username: &str, password: &str) -> Vec<u8> {
    let mut token = Vec::with_capacity(username.len() + password.len() + 2);
    token.push(0);
    token.extend_from_slice(username.as_bytes());
    token.push(0);
    token.extend_from_slice(password.as_bytes());
    token
}

#[derive(Debug, Clone, Copy)]
enum ScramHash {
    Sha256,
    Sha512,
}

impl ScramHash {
    fn hmac(self, key: &[u8], data: &[u8]) -> Result<Vec<u8>> {
        let invalid = |e: hmac::digest::InvalidLength| Error::protocol(format!("scram hmac: {}", e));
        Ok(match self {
            Self::Sha256 => {
                let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
            Self::Sha512 => {
                let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(invalid)?;
                mac.update(data);
                mac.finalize().into_bytes().to_vec()
            }
        })
    }

    fn hash(self, data: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(data).to_vec(),
            Self::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// `Hi()` from RFC 5802, i.e. PBKDF2 with HMAC as the PRF.
    fn salted_password(self, password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        match self {
            Self::Sha256 => {
                let mut out = [0u8; 32];
                pbkdf2::pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut out);
                out.to_vec()
            }
            Self::Sha512 => {
                let mut out = [0u8; 64];
                pbkdf2::pbkdf2_hmac::<Sha512>(password, salt, iterations, &mut out);
                out.to_vec()
            }
        }
    }
}

/// Client side of a SCRAM exchange.
#[derive(Debug)]
pub struct ScramClient {
    hash: ScramHash,
    password: String,
    client_first_bare: String,
    client_nonce: String,
    server_signature: Option<Vec<u8>>,
}

impl ScramClient {
    /// Starts an exchange with a random nonce.
    pub fn new(mechanism: SaslMechanism, username: &str, password: &str) -> Result<Self> {
        let nonce = uuid::Uuid::new_v4().simple().to_string();
        Self::with_nonce(mechanism, username, password, &nonce)
    }

    /// Starts an exchange with a caller-supplied nonce.
    pub fn with_nonce(
        mechanism: SaslMechanism,
        username: &str,
        password: &str,
        nonce: &str,
    ) -> Result<Self> {
        let hash = match mechanism {
            SaslMechanism::ScramSha256 => ScramHash::Sha256,
            SaslMechanism::ScramSha512 => ScramHash::Sha512,
            SaslMechanism::Plain => {
                return Err(Error::UnsupportedMechanism(format!("{} is not a SCRAM mechanism", mechanism)))
            }
        };
        let escaped = username.replace('=', "=3D").replace(',', "=2C");
        Ok(Self {
            hash,
            password: password.to_string(),
            client_first_bare: format!("n={},r={}", escaped, nonce),
            client_nonce: nonce.to_string(),
            server_signature: None,
        })
    }

    /// The client-first message (no channel binding, no authzid).
    pub fn client_first(&self) -> String {
        format!("n,,{}", self.client_first_bare)
    }

    /// Consumes the server-first message and produces the client-final message.
    pub fn client_final(&mut self, server_first: &str) -> Result<String> {
        let mut nonce = None;
        let mut salt = None;
        let mut iterations = None;
        for attr in server_first.split(',') {
            match attr.split_once('=') {
                Some(("r", v)) => nonce = Some(v),
                Some(("s", v)) => salt = Some(v),
                Some(("i", v)) => iterations = Some(v),
                Some(("e", v)) => {
                    return Err(Error::connection(format!("scram server error: {}", v)))
                }
                _ => {}
            }
        }

        let nonce = nonce.ok_or_else(|| Error::protocol("scram server-first without nonce"))?;
        if !nonce.starts_with(&self.client_nonce) {
            return Err(Error::protocol("scram server nonce does not extend client nonce"));
        }
        let salt = STANDARD
            .decode(salt.ok_or_else(|| Error::protocol("scram server-first without salt"))?)
            .map_err(|e| Error::protocol(format!("scram salt: {}", e)))?;
        let iterations: u32 = iterations
            .ok_or_else(|| Error::protocol("scram server-first without iteration count"))?
            .parse()
            .map_err(|e| Error::protocol(format!("scram iteration count: {}", e)))?;
        if iterations == 0 {
            return Err(Error::protocol("scram iteration count must be positive"));
        }

        let salted = self
            .hash
            .salted_password(self.password.as_bytes(), &salt, iterations);
        let client_key = self.hash.hmac(&salted, b"Client Key")?;
        let stored_key = self.hash.hash(&client_key);
        let server_key = self.hash.hmac(&salted, b"Server Key")?;

        let without_proof = format!("c=biws,r={}", nonce);
        let auth_message = format!("{},{},{}", self.client_first_bare, server_first, without_proof);

        let client_signature = self.hash.hmac(&stored_key, auth_message.as_bytes())?;
        let proof: Vec<u8> = client_key
            .iter()
            .zip(&client_signature)
            .map(|(k, s)| k ^ s)
            .collect();
        self.server_signature = Some(self.hash.hmac(&server_key, auth_message.as_bytes())?);

        Ok(format!("{},p={}", without_proof, STANDARD.encode(proof)))
    }

    /// Verifies the server-final message.
    pub fn verify_server_final(&self, server_final: &str) -> Result<()> {
        if let Some(err) = server_final.strip_prefix("e=") {
            return Err(Error::connection(format!("scram authentication failed: {}", err)));
        }
        let expected = self
            .server_signature
            .as_ref()
            .ok_or_else(|| Error::protocol("scram server-final before client-final"))?;
        let verifier = server_final
            .strip_prefix("v=")
            .ok_or_else(|| Error::protocol("scram server-final without verifier"))?;
        let received = STANDARD
            .decode(verifier)
            .map_err(|e| Error::protocol(format!("scram verifier: {}", e)))?;
        if &received != expected {
            return Err(Error::connection("scram server signature mismatch"));
        }
        Ok(())
    }
}
