//! Built-in redirection strategies.
//!
//! | Strategy | Reusable | Where the next stage runs |
//! |---|---|---|
//! | [`LocalRedirector`](crate::LocalRedirector) | yes | calling thread |
//! | [`PoolRedirector`] | yes | a task on the given executor |
//! | [`TimerRedirector`] | yes | a timer task once the deadline passes |
//! | [`TimeoutRedirector`] | if its inner strategy is | a nested chain raced against a timeout |
//! | [`Join`] | no | after every fan-out instance succeeded |

mod fan_out;
mod pool;
mod timeout;
mod timer;

pub use fan_out::{FanOut, Join, JoinSlot};
pub use pool::PoolRedirector;
pub use timeout::{TimeoutChecker, TimeoutHandle, TimeoutRedirector, TimerTimeout};
pub use timer::TimerRedirector;
