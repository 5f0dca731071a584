//! Signed authorization header for the opening POST.
//!
//! The initiator proves possession of a long-lived Ed25519 key by signing a
//! monotonically increasing sequence number:
//!
//! ```text
//! Authorization: Signed <public-key-hex>.<seq>.<signature-hex>
//! ```
//!
//! The signature covers `roomlink-open:<seq>`. The verifier accepts any
//! correctly signed header, or only headers from a configured set of trusted
//! keys, and refuses a sequence number that does not exceed the last one it
//! accepted from the same key. Sequence numbers are remembered for a bounded
//! number of keys; the key accepted least recently is forgotten first.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Mutex, PoisonError},
};

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::{env::Environment, error::AuthError};

/// Authorization scheme name.
pub const AUTH_SCHEME: &str = "Signed";

/// Keys whose last sequence number a [`HeaderVerifier`] remembers by default.
pub const DEFAULT_REPLAY_CAPACITY: usize = 4096;

/// Domain separation prefix for the signed payload.
const SIGNING_CONTEXT: &str = "roomlink-open:";

fn signed_payload(seq: u64) -> Vec<u8> {
    format!("{SIGNING_CONTEXT}{seq}").into_bytes()
}

/// Produces authorization headers from a signing key.
///
/// # Security
///
/// - **Debug Redaction**: The `Debug` impl prints only the public key.
pub struct HeaderSigner {
    key: SigningKey,
    seq: u64,
}

impl HeaderSigner {
    /// Wrap an existing signing key. The first header uses sequence 1.
    pub fn new(key: SigningKey) -> Self {
        Self { key, seq: 0 }
    }

    /// Build a signer from a 32-byte secret.
    pub fn from_secret_bytes(secret: &[u8; 32]) -> Self {
        Self::new(SigningKey::from_bytes(secret))
    }

    /// Generate a fresh key from the environment's RNG.
    pub fn generate<E: Environment>(env: &E) -> Self {
        let mut secret = [0u8; 32];
        env.random_bytes(&mut secret);
        Self::from_secret_bytes(&secret)
    }

    /// Resume signing after `seq` (e.g. a persisted counter).
    #[must_use]
    pub fn with_sequence(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    /// The verifying half of the key.
    pub fn verifying_key(&self) -> VerifyingKey {
        self.key.verifying_key()
    }

    /// Hex-encoded public key, as it appears in headers.
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().as_bytes())
    }

    /// Last sequence number used.
    pub fn sequence(&self) -> u64 {
        self.seq
    }

    /// Sign the next sequence number and render the header value.
    pub fn next_header(&mut self) -> String {
        self.seq += 1;
        let signature = self.key.sign(&signed_payload(self.seq));
        format!(
            "{AUTH_SCHEME} {}.{}.{}",
            self.public_key_hex(),
            self.seq,
            hex::encode(signature.to_bytes())
        )
    }
}

impl std::fmt::Debug for HeaderSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeaderSigner")
            .field("public_key", &self.public_key_hex())
            .field("seq", &self.seq)
            .finish_non_exhaustive()
    }
}

/// A parsed, not yet verified, authorization header.
#[derive(Debug, Clone)]
pub struct SignedHeader {
    key: VerifyingKey,
    seq: u64,
    signature: Signature,
}

impl SignedHeader {
    /// Parse a header value.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::Malformed` if the value is not
    /// `Signed <key>.<seq>.<signature>` with valid hex and a valid curve point.
    pub fn parse(value: &str) -> Result<Self, AuthError> {
        let malformed = |reason: &str| AuthError::Malformed { reason: reason.to_string() };

        let token = value
            .trim()
            .strip_prefix(AUTH_SCHEME)
            .and_then(|rest| rest.strip_prefix(' '))
            .ok_or_else(|| malformed("expected `Signed` scheme"))?;

        let mut parts = token.split('.');
        let (Some(key), Some(seq), Some(sig), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(malformed("expected three dot-separated fields"));
        };

        let key = parse_verifying_key(key)?;
        let seq = seq.parse::<u64>().map_err(|_| malformed("sequence is not a number"))?;

        let mut sig_bytes = [0u8; 64];
        hex::decode_to_slice(sig, &mut sig_bytes)
            .map_err(|_| malformed("signature is not 64 hex-encoded bytes"))?;

        Ok(Self { key, seq, signature: Signature::from_bytes(&sig_bytes) })
    }

    /// Check the signature against the embedded key.
    ///
    /// # Errors
    ///
    /// Returns `AuthError::BadSignature` on mismatch.
    pub fn verify(&self) -> Result<(), AuthError> {
        self.key
            .verify(&signed_payload(self.seq), &self.signature)
            .map_err(|_| AuthError::BadSignature)
    }

    /// The signer's public key.
    pub fn key(&self) -> &VerifyingKey {
        &self.key
    }

    /// Hex-encoded signer key.
    pub fn key_hex(&self) -> String {
        hex::encode(self.key.as_bytes())
    }

    /// Sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }
}

/// Parse a hex-encoded Ed25519 public key.
///
/// # Errors
///
/// Returns `AuthError::Malformed` for bad hex or an invalid point.
pub fn parse_verifying_key(hex_key: &str) -> Result<VerifyingKey, AuthError> {
    let mut bytes = [0u8; 32];
    hex::decode_to_slice(hex_key, &mut bytes).map_err(|_| AuthError::Malformed {
        reason: "public key is not 32 hex-encoded bytes".to_string(),
    })?;
    VerifyingKey::from_bytes(&bytes)
        .map_err(|_| AuthError::Malformed { reason: "public key is not a valid point".to_string() })
}

/// Highest accepted sequence per key, capped at `capacity` keys.
#[derive(Debug)]
struct ReplayTable {
    capacity: usize,
    /// Key to (last sequence, acceptance stamp).
    last_seq: HashMap<[u8; 32], (u64, u64)>,
    /// Acceptance stamp to key, oldest first.
    by_age: BTreeMap<u64, [u8; 32]>,
    clock: u64,
}

impl ReplayTable {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            last_seq: HashMap::new(),
            by_age: BTreeMap::new(),
            clock: 0,
        }
    }

    fn record(&mut self, key: [u8; 32], seq: u64) -> Result<(), AuthError> {
        match self.last_seq.get(&key) {
            Some(&(last, _)) if seq <= last => return Err(AuthError::Replayed { seq, last }),
            Some(&(_, stamp)) => {
                self.by_age.remove(&stamp);
            },
            None if self.last_seq.len() >= self.capacity => {
                if let Some((_, oldest)) = self.by_age.pop_first() {
                    self.last_seq.remove(&oldest);
                }
            },
            None => {},
        }

        self.clock += 1;
        self.last_seq.insert(key, (seq, self.clock));
        self.by_age.insert(self.clock, key);
        Ok(())
    }
}

/// Verifies authorization headers and guards against replay.
#[derive(Debug)]
pub struct HeaderVerifier {
    /// `None` accepts any key.
    trusted: Option<HashSet<[u8; 32]>>,
    replay: Mutex<ReplayTable>,
}

impl Default for HeaderVerifier {
    fn default() -> Self {
        Self { trusted: None, replay: Mutex::new(ReplayTable::new(DEFAULT_REPLAY_CAPACITY)) }
    }
}

impl HeaderVerifier {
    /// Accept correctly signed headers from any key.
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept only headers signed by one of `keys`.
    pub fn with_trusted_keys(keys: impl IntoIterator<Item = VerifyingKey>) -> Self {
        Self {
            trusted: Some(keys.into_iter().map(|k| k.to_bytes()).collect()),
            ..Self::default()
        }
    }

    /// Remember sequence numbers for at most `capacity` keys (minimum 1).
    #[must_use]
    pub fn with_replay_capacity(self, capacity: usize) -> Self {
        Self { replay: Mutex::new(ReplayTable::new(capacity)), ..self }
    }

    /// Whether the verifier is restricted to a trusted key set.
    pub fn is_restricted(&self) -> bool {
        self.trusted.is_some()
    }

    /// Number of keys whose last sequence number is currently remembered.
    pub fn tracked_keys(&self) -> usize {
        self.lock_replay().last_seq.len()
    }

    fn lock_replay(&self) -> std::sync::MutexGuard<'_, ReplayTable> {
        self.replay.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Verify a raw header value and record its sequence number.
    ///
    /// # Errors
    ///
    /// - `AuthError::Missing` when `header` is `None` or blank
    /// - `AuthError::Malformed` / `AuthError::BadSignature` for invalid headers
    /// - `AuthError::UntrustedKey` for keys outside the trusted set
    /// - `AuthError::Replayed` for a sequence number that does not exceed the
    ///   last one accepted from a remembered key
    pub fn check(&self, header: Option<&str>) -> Result<SignedHeader, AuthError> {
        let value = header.filter(|v| !v.trim().is_empty()).ok_or(AuthError::Missing)?;
        let parsed = SignedHeader::parse(value)?;
        parsed.verify()?;

        let key = parsed.key.to_bytes();
        if let Some(trusted) = &self.trusted
            && !trusted.contains(&key)
        {
            return Err(AuthError::UntrustedKey { key: parsed.key_hex() });
        }

        self.lock_replay().record(key, parsed.seq)?;
        Ok(parsed)
    }
}
