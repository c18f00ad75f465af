// Shared building blocks for the codegen-hexa backend: configuration,
// notebook persistence, session coordination, and wire types.

pub mod config;
pub mod protocol;
pub mod session;
pub mod store;
