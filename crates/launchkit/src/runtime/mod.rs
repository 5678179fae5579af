//! Runtime components: actions, the orchestration loop and process management

pub mod action;
pub mod condition;
pub mod description;
pub mod executor;
pub mod process;
pub mod registry;

pub use action::*;
pub use condition::*;
pub use description::*;
pub use executor::*;
pub use process::*;
pub use registry::*;
