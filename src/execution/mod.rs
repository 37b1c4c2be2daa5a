pub mod executor;

pub use executor::OrderExecutor;
