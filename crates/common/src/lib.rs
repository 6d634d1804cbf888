pub mod types;

pub use types::{ProcessId, RuntimeId};
