// Database boundary and the read-only SQL gate.
//
// The engine never links a database driver. Query execution, plan
// explanation, and schema description go through the `DatabaseBackend`
// trait; `SqlValidator` gates every statement before it reaches that
// boundary.

pub mod backend;
pub mod sql_validator;

pub use backend::{DatabaseBackend, QueryResult};
pub use sql_validator::{SqlValidator, SqlValidatorConfig};
