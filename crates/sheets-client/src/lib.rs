//! Minimal Google Sheets values client
//!
//! Reads a cell range from a spreadsheet with a caller-supplied OAuth2 bearer token.
//!
//! # Example
//!
//! ```no_run
//! use sheets_client::SheetsClient;
//!
//! # async fn example(token: &str) -> Result<(), sheets_client::SheetsError> {
//! let client = SheetsClient::new()?;
//! let range = client.get_values("1AbCdEf", "Keys!A2:C102", token).await?;
//! for row in range.rows() {
//!     println!("{:?}", row);
//! }
//! # Ok(())
//! # }
//! ```

mod client;
mod error;
mod types;

pub use client::SheetsClient;
pub use error::{Result, SheetsError};
pub use types::ValueRange;
