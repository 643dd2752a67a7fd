pub mod address;
pub mod footer;
pub mod message;

pub use address::Address;
pub use message::Message;
