//! Data models for datacrawl.

mod check;
mod resource;
mod table;

pub use check::{parse_http_date, Check, CheckHeaders, ModifiedSource, NewCheck};
pub use resource::{Resource, ResourceStatus};
pub use table::{ResourceException, TableIndexEntry};
