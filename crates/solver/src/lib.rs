pub mod builder;
pub mod row;
pub mod solver;
pub mod strength;
pub mod variable;

pub use builder::*;
pub use row::{Expression, GoalRow, Row, RowId};
pub use solver::*;
pub use strength::*;
pub use variable::*;
