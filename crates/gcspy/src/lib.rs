//! Reporting boundary between a garbage collector and a GCspy consumer.
//!
//! Collector code reports heap spaces through an [`Interpreter`]. With
//! [`NullInterpreter`] every report compiles away, so instrumented code runs
//! unchanged without a consumer; [`StreamInterpreter`] and [`SpyServer`]
//! encode the same reports onto the command stream.
//!
//! ```
//! use gcspy::types::SpaceId;
//! use gcspy::{write_control, NullInterpreter};
//!
//! let mut main_stream = NullInterpreter;
//! write_control!(main_stream, SpaceId(42), 1024).unwrap();
//! ```

pub mod config;
pub mod driver;
pub mod error;
pub mod interpreter;
pub mod protocol;
pub mod server;
pub mod session;

pub use config::SpyConfig;
pub use driver::Driver;
pub use driver::LinearSpaceDriver;
pub use driver::Subspace;
pub use error::SpyError;
pub use error::SpyResult;
pub use gcspy_types as types;
pub use interpreter::create_interpreter;
pub use interpreter::Interpreter;
pub use interpreter::NullInterpreter;
pub use interpreter::StreamInterpreter;
pub use server::SpyServer;
pub use session::Session;

/// Open a control block of `len` tiles for space `id` on `stream`.
///
/// `stream` is any [`Interpreter`]; with [`NullInterpreter`] the call does
/// nothing and cannot fail.
#[macro_export]
macro_rules! write_control {
    ($stream:expr, $id:expr, $len:expr) => {{
        use $crate::interpreter::Interpreter as _;
        $stream.write_control($id, $len)
    }};
}
