//! Room code generation with collision probing.
//!
//! Candidates are checked with a `HEAD` probe: 200 means the room is free,
//! 409 means it is already open and another candidate is drawn. Any other
//! answer aborts generation. After `widen_after` consecutive collisions the
//! code grows by one digit, and after `max_attempts` probes generation gives
//! up with [`ClientError::CodeSpaceExhausted`].
//!
//! The probe does not reserve the code; a concurrent opener can still win
//! the race, in which case the opening POST fails with 409.

use async_trait::async_trait;
use http::StatusCode;
use roomlink_core::{DEFAULT_CODE_LENGTH, Environment, MAX_CODE_LENGTH, RoomCode, SystemEnv};

use crate::{error::ClientError, room_http::RoomHttp};

/// Result of probing a candidate code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    /// No room has been opened under this code.
    Available,
    /// The room is already open.
    Taken,
}

/// Checks whether a code is free.
#[async_trait]
pub trait RoomProbe: Send + Sync {
    /// Probe `code`.
    ///
    /// # Errors
    ///
    /// Any error aborts generation.
    async fn probe(&self, code: &RoomCode) -> Result<Availability, ClientError>;
}

/// Probes with `HEAD {base}/parties/main/{code}`.
#[derive(Debug, Clone)]
pub struct HttpProbe {
    http: RoomHttp,
}

impl HttpProbe {
    /// Probe rooms through `http`.
    pub fn new(http: RoomHttp) -> Self {
        Self { http }
    }
}

#[async_trait]
impl RoomProbe for HttpProbe {
    async fn probe(&self, code: &RoomCode) -> Result<Availability, ClientError> {
        match self.http.head(code).await? {
            StatusCode::OK => Ok(Availability::Available),
            StatusCode::CONFLICT => Ok(Availability::Taken),
            status => Err(ClientError::Status { status, body: String::new() }),
        }
    }
}

/// Limits for code generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Digits in the first candidates.
    pub initial_length: usize,
    /// Consecutive collisions before the code grows by one digit. Zero
    /// disables widening.
    pub widen_after: u32,
    /// Total probes before giving up.
    pub max_attempts: u32,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self { initial_length: DEFAULT_CODE_LENGTH, widen_after: 8, max_attempts: 32 }
    }
}

type CandidateFn = Box<dyn FnMut(usize) -> RoomCode + Send>;

/// Produces room codes that were free when probed.
pub struct CodeGenerator {
    config: GeneratorConfig,
    candidate: CandidateFn,
}

impl CodeGenerator {
    /// Uniform random digits from the system RNG.
    pub fn new(config: GeneratorConfig) -> Self {
        Self::with_env(SystemEnv::new(), config)
    }

    /// Uniform random digits from `env`.
    pub fn with_env<E: Environment>(env: E, config: GeneratorConfig) -> Self {
        Self::with_candidates(config, move |len| RoomCode::random(&env, len))
    }

    /// Candidates from `candidate`, called with the current code length.
    pub fn with_candidates<F>(config: GeneratorConfig, candidate: F) -> Self
    where
        F: FnMut(usize) -> RoomCode + Send + 'static,
    {
        Self { config, candidate: Box::new(candidate) }
    }

    /// Generation limits.
    pub fn config(&self) -> &GeneratorConfig {
        &self.config
    }

    /// Draw candidates until `probe` reports one available.
    ///
    /// # Errors
    ///
    /// - `ClientError::CodeSpaceExhausted` after `max_attempts` collisions
    /// - any error returned by `probe`, unchanged
    pub async fn generate<P: RoomProbe + ?Sized>(
        &mut self,
        probe: &P,
    ) -> Result<RoomCode, ClientError> {
        let mut length = self.config.initial_length.clamp(1, MAX_CODE_LENGTH);
        let mut collisions = 0u32;

        for attempt in 1..=self.config.max_attempts {
            let candidate = (self.candidate)(length);
            match probe.probe(&candidate).await? {
                Availability::Available => {
                    tracing::debug!(code = %candidate, attempt, "room code available");
                    return Ok(candidate);
                },
                Availability::Taken => {
                    tracing::debug!(code = %candidate, attempt, "room code taken");
                    collisions += 1;
                    if self.config.widen_after > 0
                        && collisions >= self.config.widen_after
                        && length < MAX_CODE_LENGTH
                    {
                        length += 1;
                        collisions = 0;
                        tracing::info!(length, "widening room code space");
                    }
                },
            }
        }

        Err(ClientError::CodeSpaceExhausted { attempts: self.config.max_attempts })
    }
}

impl Default for CodeGenerator {
    fn default() -> Self {
        Self::new(GeneratorConfig::default())
    }
}

impl std::fmt::Debug for CodeGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodeGenerator").field("config", &self.config).finish_non_exhaustive()
    }
}
