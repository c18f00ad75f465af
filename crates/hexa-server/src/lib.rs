// HTTP and WebSocket surface of the codegen-hexa backend.

pub mod container;
pub mod error;
pub mod marimo;
pub mod proxy;
pub mod routes;
pub mod state;
pub mod voice;

pub use routes::create_router;
pub use state::AppState;
