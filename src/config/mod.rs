pub mod codec;
pub mod proxies;
pub mod schema;
pub mod store;

pub use codec::CodecError;
pub use proxies::{ProxyError, ProxyStore};
pub use schema::{ClientConfig, Configuration, ProxyEntry, ProxyKind, RoleConfig, ServerConfig};
pub use store::{ConfigError, ConfigStore};
