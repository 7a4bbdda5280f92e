//! Shared message types for tabmind UI-to-background communication.
//!
//! The side panel UI and the background engine run in separate
//! execution contexts connected only by asynchronous message passing.
//! Every interaction between them is a serialized request/response
//! pair defined here:
//! - [`RpcRequest`] carries a correlation id and a tagged payload.
//! - [`RpcResponse`] echoes the id and wraps the result in an
//!   [`Outcome`] envelope, so callers never have to guess whether a
//!   handler exists or threw.

mod request;
mod response;

pub use request::RpcRequest;
pub use request::RpcRequestPayload;
pub use response::{Outcome, RpcResponse};
