mod channel_router;
mod diagnostics;
mod disposition;
mod envelope;
mod error;
mod log_level;
mod projection;
mod router_context;

pub use channel_router::*;
pub use diagnostics::*;
pub use disposition::*;
pub use envelope::*;
pub use error::*;
pub use log_level::*;
pub use projection::*;
pub use router_context::*;
