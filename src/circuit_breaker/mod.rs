pub mod breaker;
pub mod observed;
pub mod registry;
pub mod types;

pub use breaker::CircuitBreaker;
pub use observed::ObservedCircuitBreaker;
pub use registry::EndpointBreakerRegistry;
pub use types::{CircuitBreakerConfig, CircuitBreakerMetrics, CircuitState};
