mod backend;
mod error;
mod redis_backend;

pub use backend::KvBackend;
pub use error::{Error, Result};
pub use redis_backend::RedisBackend;
