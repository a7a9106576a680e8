//! Fake POP3 server for integration testing
//!
//! This module provides an in-process POP3 server that speaks enough
//! of the protocol to test the retrieval session end-to-end:
//!
//! TCP -> greeting -> [STLS -> TLS] -> USER/PASS or APOP -> commands -> QUIT
//!
//! ## Module layout
//!
//! - `server` -- TCP listener, TLS setup, and connection dispatch
//! - `handlers/` -- one file per POP3 command (LIST, RETR, etc.)
//! - `maildrop` -- test data model (messages, credentials, builder)
//! - `io` -- shared write helpers

mod handlers;
mod io;
pub mod maildrop;

pub use maildrop::MaildropBuilder;
pub use server::{FakePop3Server, ServerTls};
