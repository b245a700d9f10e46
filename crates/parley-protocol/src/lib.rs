//! # parley-protocol
//!
//! Wire protocol definitions for the Parley chat service.
//!
//! Every unit exchanged on a connection is a [`Frame`], serialized with
//! MessagePack and prefixed with its length so a stream reader always
//! decodes exactly one logical unit at a time.
//!
//! ## Frame Types
//!
//! - `Identify` - First frame from a client, carries the username
//! - `Welcome` / `Error` - Server answers to identification
//! - `Message` - A directed chat message
//!
//! ## Example
//!
//! ```rust
//! use parley_protocol::{codec, Frame, Message};
//!
//! let frame = Frame::message(Message::new("alice", "bob", "hello"));
//!
//! let encoded = codec::encode(&frame).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(frame, decoded);
//! ```

pub mod codec;
pub mod frames;
pub mod message;
pub mod username;

pub use codec::{decode, encode, FrameCodec, ProtocolError};
pub use frames::{ErrorCode, Frame};
pub use message::Message;
pub use username::{validate_username, UsernameError, MAX_USERNAME_LENGTH};
