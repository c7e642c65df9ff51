use actix_web::HttpResponse;
use anyhow::{Context, Result};
use log::error;
use reqwest::Client;
use std::time::Duration;

/// Create the HTTP client used for Supabase REST and edge function calls
///
/// # Arguments
/// * `timeout` - Per-request timeout applied to every call made with the client
pub fn edge_function_client(timeout: Duration) -> Result<Client> {
    Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to create edge function HTTP client")
}

/// Trait for converting service results into HTTP responses
pub trait ServiceResultResponse {
    fn into_response(self) -> HttpResponse;
}

impl ServiceResultResponse for () {
    fn into_response(self) -> HttpResponse {
        HttpResponse::Ok().finish()
    }
}

/// Handle Result and convert data to Response
///
/// Puts the data or the error in a corresponding response; errors are logged
/// before being returned as 500.
///
/// # Arguments
/// * `result` - The Result to handle
/// * `operation` - Context message describing the operation
pub fn handle_service_result<T>(result: Result<T>, operation: &str) -> HttpResponse
where
    T: ServiceResultResponse,
{
    match result {
        Ok(data) => data.into_response(),
        Err(e) => {
            error!("{operation} failed: {e:#}");
            HttpResponse::InternalServerError().body(e.to_string())
        }
    }
}
