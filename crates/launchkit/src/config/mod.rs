//! Launch configuration: substitutions, the resolution context and the YAML front-end

mod context;
mod launch_file;
mod lookup;
mod rewrite;
mod substitution;

pub use context::*;
pub use launch_file::*;
pub use lookup::*;
pub use rewrite::*;
pub use substitution::*;
