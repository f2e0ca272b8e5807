pub mod queue;
pub mod stop;

pub use queue::{Callback, Queue, QueueState};
pub use stop::StopHandle;
