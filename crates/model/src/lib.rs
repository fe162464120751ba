//! Provider-agnostic protocol between the relay and hosted LLMs.
//!
//! The types here describe what goes over the wire to a chat model and
//! what comes back: messages, tool declarations, tool call requests and
//! the streamed response events. They carry no behavior of their own,
//! providers implement the traits and the core crate drives them.
//!
//! Anything provider specific (wire formats, authentication, streaming
//! transports) belongs to the provider crates, not here.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
