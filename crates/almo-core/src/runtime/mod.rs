pub mod assembler;
pub mod cancel;
pub mod driver;
pub mod monitor;
pub mod multiplexer;
pub mod sample;
pub mod sink;
pub mod types;

#[cfg(test)]
mod tests;
