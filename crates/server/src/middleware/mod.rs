//! Request extractors.

pub mod actor;

pub use actor::{Actor, RequireActor};
