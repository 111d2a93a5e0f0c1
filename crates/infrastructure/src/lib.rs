pub mod factory;
pub mod loopback;
pub mod outbox;
pub mod rabbitmq;

#[cfg(test)]
mod rabbitmq_test;

pub use factory::*;
pub use loopback::*;
pub use outbox::*;
pub use rabbitmq::*;
