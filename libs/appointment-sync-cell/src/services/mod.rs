pub mod deletion;
pub mod directory;
pub mod idempotency;
pub mod notification;
pub mod orchestrator;
pub mod provider;
pub mod recovery;
pub mod recurring;
pub mod scheduler;
pub mod store;

pub use deletion::*;
pub use directory::*;
pub use idempotency::*;
pub use notification::*;
pub use orchestrator::*;
pub use provider::*;
pub use recovery::*;
pub use recurring::*;
pub use scheduler::*;
pub use store::*;
