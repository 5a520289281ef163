pub mod allocator;
pub mod error;
pub mod sqlite_store;
pub mod store;

pub use allocator::*;
pub use error::*;
pub use sqlite_store::*;
pub use store::*;
