//! rdsconn-tunnel: authenticated tunnels into a private VPC through an
//! EC2 Instance Connect Endpoint, and the local relay that serves them.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use aws_credential_types::provider::SharedCredentialsProvider;
//! use aws_credential_types::Credentials;
//! use rdsconn_core::GatewayEndpoint;
//! use rdsconn_tunnel::{allocate, RelayServer, TunnelDialer};
//!
//! # async fn example() -> rdsconn_core::ConnResult<()> {
//! let credentials = Credentials::new("AKID", "SECRET", None, None, "example");
//! let dialer = TunnelDialer::new(
//!     SharedCredentialsProvider::new(credentials),
//!     "us-east-1",
//!     GatewayEndpoint::new(
//!         "eice-0123456789abcdef0",
//!         "eice-0123456789abcdef0.ec2-instance-connect-endpoint.us-east-1.amazonaws.com",
//!     ),
//!     Duration::from_secs(3600),
//! );
//!
//! let (listener, port) = allocate(0, 5432).await?;
//! println!("listening on localhost:{port}");
//! RelayServer::new(listener, Arc::new(dialer), "10.0.1.23:5432").run().await
//! # }
//! ```

pub mod dialer;
pub mod listener;
pub mod relay;
pub mod signer;
pub mod transport;

// Re-export primary public types.
pub use dialer::TunnelDialer;
pub use listener::{allocate, PORT_SCAN_WIDTH};
pub use relay::{relay, RelayServer, RelayStats};
pub use signer::{presign_url, sign_url, SigningConfig};
pub use transport::{ByteStream, Dial, MessageTransport, TunnelStream};

// Re-export rdsconn-core error types for convenience.
pub use rdsconn_core::{ConnError, ConnResult};
