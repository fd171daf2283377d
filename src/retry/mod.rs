pub mod budget;
pub mod executor;
pub mod strategy;

pub use budget::RetryBudget;
pub use executor::RetryExecutor;
pub use strategy::{ConstantBackoff, ExponentialBackoff, LinearBackoff, RetryStrategy};
