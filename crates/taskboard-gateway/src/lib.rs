mod config;
mod http;
mod memory;
pub mod query;
mod traits;

pub use config::{create_backend, Backend, BackendConfig};
pub use http::{HttpAuth, HttpGateway};
pub use memory::{FailPoint, MemoryAuth, MemoryGateway, MemoryTables};
pub use query::{decode_row, decode_rows, Collection, Filter, Query, QueryKind, QueryResult};
pub use traits::{
    AccessToken, AuthBackend, AuthResponse, AuthTokens, AuthUser, DataGateway, GatewayError,
};
