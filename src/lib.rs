//! # shd
//!
//! Home automation daemon that switches outside lights through a powerline
//! modem at sunrise and sunset.
//!
//! ## Architecture
//!
//! - **Reactor**: `reactor` runs a single-threaded poll loop with alarms and
//!   deferred callbacks, exposed to components as narrow capability traits
//! - **I/O**: `io` provides the chunked byte buffer, the buffered asynchronous
//!   connection and the serial port resource
//! - **Protocol**: `plm` frames modem traffic and drives commands through
//!   modem and device acknowledgements with retries
//! - **Scheduling**: `lights` and `solar` decide when each light changes state
//! - **Infrastructure**: configuration, argument parsing, signals and logging

// Import macros from logger module for use in all submodules
#[macro_use]
pub mod logger;

pub mod args;
pub mod config;
pub mod constants;
pub mod io;
pub mod lights;
pub mod plm;
pub mod reactor;
pub mod signals;
pub mod solar;
pub mod time_source;

#[cfg(any(test, feature = "testing-support"))]
pub mod testing;
