//! trackd - GPS tracker ingestion server.
//!
//! Listens on one TCP port per tracker protocol plus an HTTP endpoint for
//! phone clients, decodes vendor frames into normalized positions, and
//! archives them as daily JSON line files. Devices are registered in a JSON
//! file that is re-read periodically while the server runs.

pub mod archive;
pub mod config;
pub mod date_builder;
pub mod devices;
pub mod dispatcher;
pub mod metrics;
pub mod parser;
pub mod pattern;
pub mod position;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;
pub mod web;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use position::Position;
pub use protocol::{Frame, ProtocolDecoder, create_decoder};
pub use registry::DeviceRegistry;
pub use session::{Connection, Session};
