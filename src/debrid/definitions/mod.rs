//! Vendor adapters implementing [`Provider`](crate::debrid::Provider).

pub mod alldebrid;
pub mod realdebrid;
pub mod torbox;

pub use alldebrid::AllDebridProvider;
pub use realdebrid::RealDebridProvider;
pub use torbox::TorBoxProvider;
