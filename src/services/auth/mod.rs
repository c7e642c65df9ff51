//! Authentication services
//!
//! Session tokens and the local dashboard password, independent of HTTP
//! concerns.

pub mod password;
pub mod token;

pub use password::PasswordService;
pub use token::TokenManager;
