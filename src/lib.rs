//! Zero-copy, full-duplex bridging of connected sockets.
//!
//! Given two already-established, non-blocking stream sockets, this crate
//! relays bytes in both directions through kernel pipes using Linux
//! `splice(2)`, so payload data never crosses into user space. Each direction
//! owns its own pipe and runs independently; backpressure comes from the
//! kernel pipe bound, half-closes and peer resets are propagated without
//! tearing down the opposite direction.
//!
//! Connection establishment, TLS and any protocol above raw bytes are the
//! caller's business: hand over two [`Endpoint`]s and await the relay.
//!
//! ```no_run
//! # async fn run() -> std::io::Result<()> {
//! use splice_bridge::{Endpoint, bridge_duplex};
//! use tokio::net::TcpStream;
//!
//! let client = TcpStream::connect("127.0.0.1:8080").await?;
//! let backend = TcpStream::connect("10.0.0.1:9000").await?;
//! let mut a = Endpoint::from_tcp(client)?;
//! let mut b = Endpoint::from_tcp(backend)?;
//! let (up, down) = bridge_duplex(&mut a, &mut b).await?;
//! println!("relayed {up} bytes up, {down} bytes down");
//! # Ok(())
//! # }
//! ```

mod bridge;
mod endpoint;
mod pipe;
mod ready;
mod session;

pub use endpoint::{Endpoint, SendOutcome};
pub use session::{DuplexBridge, bridge_duplex, bridge_one_direction};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
