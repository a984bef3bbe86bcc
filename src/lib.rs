//! Forward HTTP caching proxy: accepts client connections, serves `GET`
//! responses from a bounded in-memory LRU cache when possible, and
//! otherwise forwards the request upstream, streaming the response back to
//! the client while recording it in the cache for later reuse.

pub mod acceptor;
pub mod cache;
pub mod cli;
pub mod error_response;
pub mod handler;
pub mod parser;
pub mod upstream;

pub use cache::ProxyCache;
