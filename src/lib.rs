pub mod api;
pub mod catalog;
pub mod config;
pub mod credentials;
pub mod http_client;
pub mod middleware;
pub mod model;
pub mod qr;
pub mod services;
pub mod supabase_client;
pub mod ttn_client;

// Re-export commonly used items
pub use services::auth;
pub use services::provisioning;
