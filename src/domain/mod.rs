mod consts;
pub mod crypto;
mod device;
mod session;
pub mod topics;
mod user;

pub use consts::*;
pub use device::*;
pub use session::*;
pub use user::*;
