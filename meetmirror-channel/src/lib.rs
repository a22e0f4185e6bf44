pub mod channel;
pub mod protocol;

pub use channel::*;
pub use protocol::*;
