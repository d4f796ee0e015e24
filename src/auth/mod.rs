//! Authentication Module
//! Mission: Token-pair sessions, password login and bearer authentication

pub mod api;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod password;
pub mod service;
pub mod session;

pub use api::AuthState;
pub use jwt::{TokenClass, TokenCodec, TokenError};
pub use middleware::{authenticate, RequestContext};
pub use models::{Account, AccountType, PublicAccount};
pub use password::PasswordHasher;
pub use service::AuthService;
pub use session::{CacheError, MemorySessionCache, SessionCache, TimedSessionCache};
