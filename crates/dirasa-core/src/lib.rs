//! # dirasa-core
//!
//! Shared vocabulary for the dirasa live notification client.
//!
//! - **Branded IDs**: `SessionId`, `ConnectionId` as newtypes for type safety
//! - **Messages**: `InboundMessage` decoded from `{"type", "payload"}` frames,
//!   with `MessageKind` classifying the consumed challenge events
//! - **Topics**: `Topic` and `topic_for`, deriving the channel path from auth state
//! - **Locale**: `Locale` selecting English or Arabic alert text
//! - **Errors**: `FrameError` for undecodable frames

#![deny(unsafe_code)]

pub mod errors;
pub mod ids;
pub mod locale;
pub mod messages;
pub mod topic;

pub use errors::FrameError;
pub use ids::{ConnectionId, SessionId};
pub use locale::Locale;
pub use messages::{InboundMessage, MessageKind, decode_frame};
pub use topic::{Topic, topic_for};
