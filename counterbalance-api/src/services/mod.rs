//! Service Layer
//!
//! Business logic behind the HTTP handlers. Services validate input, talk to
//! the [`AssignmentStore`](counterbalance_storage::AssignmentStore) and
//! return domain results; handlers only translate DTOs and errors.

mod assignment_service;
mod completion_service;

pub use assignment_service::*;
pub use completion_service::*;
