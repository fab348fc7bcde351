pub mod client;
pub mod codec;
pub mod config;
pub mod connection;
pub mod context;
pub mod convert;
pub mod data_type;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod pipeline;
pub mod pool;
pub mod request;

pub use client::Client;
pub use config::Options;
pub use context::Context;
pub use convert::FromFrame;
pub use data_type::DataType;
pub use error::{Error, ServerError};
pub use frame::Frame;
pub use pipeline::{PendingCommand, Pipeline};
pub use request::{Request, Text, ToArg};

pub type Result<T, E = Error> = std::result::Result<T, E>;
