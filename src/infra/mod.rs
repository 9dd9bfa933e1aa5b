mod broker;
mod client;
mod correlation;
mod http;
mod map;
mod session_store;
mod signer;

pub use broker::*;
pub use client::*;
pub use correlation::*;
pub use http::*;
pub use map::*;
pub use session_store::*;
pub use signer::*;
