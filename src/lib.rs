//! minnow — a line-numbered command shell.
//!
//! Two independently hard subsystems live behind a trivial shell: a
//! segregated-fit heap allocator with deferred-free quick lists
//! ([`heap`]) and a signal-driven pipeline job runner ([`jobs`]).
//! Everything else — pipeline syntax trees, the variable store, the
//! program store, the REPL — is straightforward bookkeeping.

pub mod heap;
pub mod jobs;
pub mod log;
pub mod program;
pub mod shell;
pub mod store;
pub mod syntax;
pub mod sys;
