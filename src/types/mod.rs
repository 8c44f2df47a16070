//! Type definitions

pub mod api;
pub mod frames;
pub mod geo;
pub mod messages;
pub mod session;
pub mod stop;
pub mod time;

pub use api::*;
pub use frames::*;
pub use geo::*;
pub use messages::*;
pub use session::*;
pub use stop::*;
pub use time::*;
