pub mod generations;
pub mod liveness;
pub mod public;
pub mod readiness;
pub mod videos;
