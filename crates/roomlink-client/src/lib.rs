//! roomlink pairing client.
//!
//! Drives [`roomlink_core::SessionCore`] over real HTTP and WebSocket
//! connections:
//!
//! - [`initiate`]: pick a free code, open the room, wait for a `join`
//! - [`join`]: fetch the note, connect, send `join`, wait for a verdict
//! - [`CodeGenerator`]: collision-probing code generation with a bounded
//!   number of attempts
//!
//! # Example
//!
//! ```no_run
//! use roomlink_client::{OpenOptions, initiate, join};
//! use roomlink_core::{HeaderSigner, SessionEventKind};
//! use serde_json::json;
//!
//! # async fn demo() -> Result<(), roomlink_client::ClientError> {
//! let mut signer = HeaderSigner::from_secret_bytes(&[7; 32]);
//! let options = OpenOptions::new().with_note(json!("hello")).signed_by(&mut signer)?;
//! let (code, initiator) = initiate("http://127.0.0.1:1999", options, None).await?;
//!
//! let joiner = join(&code, "http://127.0.0.1:1999", Some(json!({ "name": "B" }))).await?;
//! let _join = initiator.subscribe(SessionEventKind::Join).await;
//! initiator.approve(None)?;
//! let _verdict = joiner.subscribe(SessionEventKind::Approve).await;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod error;
mod events;
mod generator;
mod pairing;
mod room_http;
mod session;

pub use error::ClientError;
pub use generator::{Availability, CodeGenerator, GeneratorConfig, HttpProbe, RoomProbe};
pub use pairing::{initiate, initiate_with, join, join_with};
pub use room_http::{OpenOptions, RoomHttp, party_url, socket_url};
pub use session::PairingSession;
