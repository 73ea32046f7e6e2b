//! Wire protocol shared by the chat server and client.
//!
//! Plain text, one message per line. See [`protocol`] for the few lines that carry meaning
//! beyond chat content and [`framer`] for turning a byte stream back into lines.

pub mod framer;
pub mod protocol;

pub use framer::{DEFAULT_MAX_LINE_LENGTH, FramingError, LineFramer, lines};
pub use protocol::{Directive, Input, ServerLine};
