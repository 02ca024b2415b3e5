//! API key authorization
//!
//! Decides whether a request may proceed based on the `Authorization: APIKEY <key>`
//! header and a [`KeyTable`] of per-key path/method rules. Paths are globs where `*`
//! stands for exactly one path segment; methods are comma-separated lists compared
//! case-insensitively.
//!
//! The table itself is supplied through [`KeyTableSource`], so the engine works the same
//! whether the table comes from a cache, a file or a test fixture.

mod decision;
mod engine;
mod headers;
mod rules;
mod table;

pub use decision::{AuthorizationDecision, CheckResponse};
pub use engine::{presented_key, AuthorizationEngine, KeyTableSource};
pub use headers::{HeaderSource, RequestHeaders, AUTHORIZATION, METHOD, PATH};
pub use rules::{MethodSet, PathPattern};
pub use table::{KeyRecord, KeyTable, LoadedAt};
