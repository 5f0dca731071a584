//! Room codes.
//!
//! A room is addressed by a short numeric code that a human can read off one
//! screen and type into another. Codes are plain ASCII digit strings; the
//! default width is six digits, and the code generator may widen it when the
//! namespace gets crowded.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{env::Environment, error::CodeError};

/// Width of a freshly generated code.
pub const DEFAULT_CODE_LENGTH: usize = 6;

/// Widest code the hosting route accepts.
pub const MAX_CODE_LENGTH: usize = 10;

/// A validated room code: 1 to [`MAX_CODE_LENGTH`] ASCII digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RoomCode(String);

impl RoomCode {
    /// Parse and validate a room code.
    ///
    /// # Errors
    ///
    /// Returns `CodeError::Empty`, `CodeError::TooLong` or
    /// `CodeError::NonDigit` when `code` does not match the digit pattern.
    pub fn parse(code: &str) -> Result<Self, CodeError> {
        if code.is_empty() {
            return Err(CodeError::Empty);
        }
        if code.len() > MAX_CODE_LENGTH {
            return Err(CodeError::TooLong { len: code.len(), max: MAX_CODE_LENGTH });
        }
        if let Some(c) = code.chars().find(|c| !c.is_ascii_digit()) {
            return Err(CodeError::NonDigit(c));
        }

        Ok(Self(code.to_string()))
    }

    /// Draw a uniformly random code of `len` digits.
    ///
    /// `len` is clamped to `1..=MAX_CODE_LENGTH`.
    pub fn random<E: Environment>(env: &E, len: usize) -> Self {
        let len = len.clamp(1, MAX_CODE_LENGTH);
        let code = (0..len)
            .map(|_| {
                // Modulo bias over a u64 is below 1e-18 per digit.
                let digit = (env.random_u64() % 10) as u8;
                char::from(b'0' + digit)
            })
            .collect();

        Self(code)
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Number of digits in the code.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Always false; a valid code has at least one digit.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for RoomCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RoomCode {
    type Err = CodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RoomCode {
    type Error = CodeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<RoomCode> for String {
    fn from(code: RoomCode) -> Self {
        code.0
    }
}

impl AsRef<str> for RoomCode {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
