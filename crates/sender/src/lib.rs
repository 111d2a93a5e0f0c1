pub mod sender_node;

pub use sender_node::*;
