pub mod catalog;
pub mod condition;
pub mod conflict;
pub mod engine;
pub mod rules;

pub use catalog::*;
pub use condition::*;
pub use conflict::*;
pub use engine::*;
pub use rules::*;
