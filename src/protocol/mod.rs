//! Wire protocol: frame boundaries, message codec and status domains.
//!
//! - [`framing`]: cuts the byte stream into one-JSON-object frames
//! - [`codec`]: encodes requests, decodes replies
//! - [`status`]: raw wire status plus one closed enum per operation

pub mod codec;
pub mod framing;
pub mod status;

pub use codec::{decode, decode_request, encode, number_param, Reply, Request};
pub use framing::{write_frame, FrameReader, DEFAULT_MAX_FRAME_LEN};
pub use status::{AlignmentStatus, HandshakeStatus, PollStatus, SetWaveStatus, Status};
