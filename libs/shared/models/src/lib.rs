pub mod appointment;
pub mod error;
pub mod office_id;

pub use appointment::*;
pub use office_id::{normalize_office_id, OfficeCode};
