//! Runtime primitives the compiled code relies on: the object heap, tables,
//! operators and the core library.

pub mod corelib;
pub mod heap;
pub mod ops;
pub mod table;

pub use heap::{Heap, Object};
pub use ops::Failure;
pub use table::{Key, Table};
