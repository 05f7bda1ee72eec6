//! The operator algebra
//!
//! Every operator consumes difference-stream messages and emits difference
//! messages whose accumulated multiplicities match its algebra over a
//! closed batch (mass conservation). Stateless operators (`map`, `filter`,
//! `negate`, `concat`) translate entries one for one; stateful operators
//! (`consolidate`, `distinct`, `join`, `reduce`, `topk`, `iterate`) keep
//! exactly the state their algebra needs to retract correctly.

mod buffer;
mod consolidate;
mod iterate;
mod join;
mod linear;
mod reduce;
mod topk;

pub use buffer::{BufferOperator, UnbufferOperator};
pub use consolidate::{ConsolidateOperator, DistinctOperator};
pub use iterate::IterateOperator;
pub use join::{JoinKind, JoinOperator};
pub use linear::{ConcatOperator, FilterOperator, MapOperator, NegateOperator};
pub use reduce::ReduceOperator;
pub use topk::{FractionalTopKOperator, TopKOperator, WindowHandle};
