pub mod block_id;
pub mod client;
pub mod deadline;
pub mod error;
pub mod provider;
pub mod registry;
pub mod sync;
pub mod traits;
pub mod transport;
pub mod types;
pub mod watcher;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

pub use block_id::*;
pub use client::*;
pub use error::*;
pub use provider::*;
pub use registry::*;
pub use sync::*;
pub use traits::*;
pub use transport::*;
pub use types::*;
pub use watcher::*;
