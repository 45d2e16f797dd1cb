//! Error taxonomy, retry, circuit breaker, and fallback primitives shared by
//! every layer of the proxy. This is the leaf crate in the dependency
//! order: nothing here depends on transports, the connection pool, or any
//! higher-level proxy state.

mod circuit_breaker;
mod error;
mod fallback;
mod retry;

pub use circuit_breaker::CircuitBreaker;
pub use circuit_breaker::CircuitBreakerThresholds;
pub use circuit_breaker::CircuitState;
pub use error::PersonaErrorCode;
pub use error::ProxyError;
pub use error::Result;
pub use fallback::FallbackChain;
pub use fallback::FallbackContext;
pub use fallback::FallbackHandler;
pub use fallback::ServerUnavailableFallback;
pub use retry::RetryPolicy;
