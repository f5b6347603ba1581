pub mod rest;

pub use rest::{ApiError, AuthStyle, RestClient};
