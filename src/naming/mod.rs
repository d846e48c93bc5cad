mod resolver;
mod sanitize;

pub use resolver::{DEFAULT_COLLISION_BOUND, NamingError, ScopeId, UniqueNameResolver};
pub use sanitize::{DEFAULT_MAX_NAME_BYTES, NameSanitizer};
