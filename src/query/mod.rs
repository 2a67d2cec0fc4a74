//! The query execution engine: access-path/join-algorithm planning, table
//! scanning, joins, expression-driven filtering, aggregation, ordering, and
//! the top-level SELECT pipeline that ties them together.

pub mod aggregate;
pub mod join;
pub mod order;
pub mod planner;
pub mod scan;
pub mod select;
pub mod tuple;

pub use planner::{AccessPlan, JoinAlgo};
pub use select::{execute_select, QueryContext, QueryResult};
pub use tuple::Tuple;
