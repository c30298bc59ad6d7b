pub mod file;
pub mod memory;
pub mod traits;

pub use file::JsonFileStore;
pub use memory::InMemoryStore;
pub use traits::{SessionStore, StorageError};
