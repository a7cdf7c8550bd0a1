//! Common test utilities.

pub mod origin;
pub mod server;

#[allow(unused_imports)]
pub use origin::*;
#[allow(unused_imports)]
pub use server::*;
