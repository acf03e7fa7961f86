pub mod domain;
pub mod nats;
pub mod turbofan_router;

pub use domain::*;
pub use nats::*;
pub use turbofan_router::*;
