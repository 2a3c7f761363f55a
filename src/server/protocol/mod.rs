//! Wire protocol: fixed frame header plus the `Message` codec.

pub mod codec;
pub mod errors;
pub mod frame;

pub use codec::BrokerCodec;
pub use errors::ParseError;
pub use frame::{FrameHeader, MAGIC};
