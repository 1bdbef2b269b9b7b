//! Operator interface.
//!
//! - [`console`] - Stdin command console driving a [`Session`](crate::engine::Session)

pub mod console;
