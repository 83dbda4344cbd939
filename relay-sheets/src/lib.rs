//! Write-back client for the spreadsheet's script endpoint.
//!
//! Pure HTTP client: status changes and new orders go out as one JSON POST
//! each, with no retries.

mod client;
mod error;
mod traits;

pub use client::SheetsClient;
pub use error::{Result, SheetError};
pub use traits::{NewOrder, SheetBackend, StatusUpdate};
