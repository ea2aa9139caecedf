pub(crate) mod core;
pub(crate) mod errors;
pub(crate) mod handlers;
pub(crate) mod metrics;
pub(crate) mod relay;
pub(crate) mod router;
pub(crate) mod types;

pub use core::AppConfig;
pub use errors::init_tracing;
pub use router::build_router;
