//! The HTTP adapter. A thin shell over the engines: routing, content
//! negotiation, and the single place every error becomes a status code.

pub mod content;
pub mod declaration;
pub mod errors;
pub mod routes;
pub mod server;

pub use errors::{HttpServerError, HttpServerResult};
pub use server::{AppState, HttpServer, HttpServerConfig};
