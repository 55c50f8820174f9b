//! Device runner for TM/TC routes.
//!
//! `tmtcd` loads a route configuration, connects to the device over TCP and
//! writes every record the route produces to stdout as a JSON line:
//!
//! - [`session`]: framing of the byte stream and the read/write loop
//! - [`DeviceLink`]: the [`CommandLink`](tmtc_protocol::CommandLink) commands
//!   are written through
//! - [`PeriodicScheduler`]: periodic internal commands
//! - [`JsonLinesSink`]: the processing model stand-in
//! - [`command`]: `invoke`/`send`/`quit` lines read from stdin

mod app;
pub mod cli;
pub mod command;
mod error;
mod executor;
mod link;
mod scheduler;
pub mod session;
mod sink;

pub use app::run;
pub use cli::Cli;
pub use error::*;
pub use executor::Executor;
pub use link::{DeviceLink, LINK_QUEUE_DEPTH};
pub use scheduler::PeriodicScheduler;
pub use sink::JsonLinesSink;
