// Data Engine Module
// Engine-neutral data access over relational and document databases

pub mod connection_cache;
pub mod drivers;
pub mod error;
pub mod filter;
pub mod pagination;
pub mod registry;
pub mod schema;
pub mod settings;
pub mod ssh_tunnel;
pub mod traits;
pub mod types;

pub use connection_cache::{ConnectionCache, ConnectionHandle};
pub use error::{EngineError, EngineResult};
pub use pagination::{PageRequest, PageResult, Pagination};
pub use registry::DriverRegistry;
pub use schema::{ColumnDescriptor, DataTypeParams, ForeignKeyDescriptor, PrimaryKeyDescriptor, TypeAttribute};
pub use settings::TableSettings;
pub use traits::{DataAccess, Driver};
pub use types::*;
