mod client;
mod dwr;
mod error;
mod logger;
pub mod protocol;
pub mod transport;
mod types;

pub use client::{MaxSession, MaxSessionBuilder};
pub use dwr::DwrResponse;
pub use error::{Error, Result};
pub use logger::CallLogMode;
pub use protocol::{Call, Literal, ResponseOutcome};
pub use transport::{HttpTransport, Transport};
pub use types::*;
