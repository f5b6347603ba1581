pub mod ingress;
pub mod retry;
pub mod dispatcher;

pub use ingress::*;
pub use retry::*;
pub use dispatcher::*;
