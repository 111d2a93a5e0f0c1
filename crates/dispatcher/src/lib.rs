pub mod sleeper;
pub mod work_dispatcher;

pub use sleeper::*;
pub use work_dispatcher::*;
