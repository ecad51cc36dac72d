// Built-in tool connectors.

pub mod sql;

pub use sql::register_sql_tools;
