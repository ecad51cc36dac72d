// The query driver: one call to `Driver::process_query` is one
// conversation turn.

pub mod driver;

pub use driver::{Driver, DriverMetrics, MAX_TOOL_ITERATIONS};
