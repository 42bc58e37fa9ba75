// SPDX-License-Identifier: Apache-2.0

//! Lumberjack v1 output over TLS.

pub mod codec;
pub mod config;
pub mod connector;
pub mod errors;
pub mod publisher;
pub mod tls;

pub use config::{PublisherConfig, ServerAddr};
pub use connector::{Connector, TlsTcpConnector};
pub use errors::PublisherError;
pub use publisher::{ConnectionState, Publisher};
pub use tls::TlsConfig;
