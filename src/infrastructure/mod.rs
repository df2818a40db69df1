pub mod cache;
pub mod http;
pub mod logging;
pub mod worker_pool;

pub use cache::{KvStore, MemoryKv, RedisCtx};
pub use http::{Headers, HttpTransport, ReqwestTransport};
pub use worker_pool::WorkerPool;
