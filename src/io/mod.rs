//! Byte transport: chunked buffer, fd abstraction and the buffered connection.

pub mod buffer;
pub mod connection;
pub mod fd;
pub mod serial;

pub use buffer::IoBuffer;
pub use connection::{BufferedConnection, ConnectionState, ReadCallback};
pub use fd::{FdError, FdInterface};
pub use serial::SerialFd;
