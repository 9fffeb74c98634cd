//! Frame dispatch, ACK/NAK responses, and the async read/write loop for the tap agent link.
//!
//! This crate is the host side of the conversation with the capture agent:
//! every frame read from the agent is decoded, reported as a [`LinkEvent`],
//! and answered with an ACK or NAK in arrival order.
//!
//! ## Features
//!
//! - **Dispatch**: closed match over frame kinds with an explicit unknown arm
//! - **Responses**: ACK/NAK plus host-initiated SYN, EOT and Ethernet frames
//! - **Synchronous core**: [`Link::on_chunk`] handles one input chunk end to end
//! - **Async driver**: [`run_link`] over any `AsyncRead`/`AsyncWrite` pair
//!
//! ## Example
//!
//! ```rust,no_run
//! use taplink_session::{run_link, LinkConfig, LinkEvent};
//! use tokio::sync::mpsc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (mut tx, mut rx) = mpsc::unbounded_channel();
//!
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         match event {
//!             LinkEvent::InterfaceInfo(info) => println!("Interface {}", info.name),
//!             LinkEvent::EthernetFrame { frame, .. } => {
//!                 println!("Frame type {:04x}", frame.ethertype)
//!             }
//!             LinkEvent::UnknownFrame { tag, .. } => println!("Unknown frame {:02x}", tag),
//!             LinkEvent::EmptyFrame => println!("Empty frame"),
//!             LinkEvent::DecodeError { error, .. } => println!("Bad frame: {}", error),
//!         }
//!     }
//! });
//!
//! let stats = run_link(
//!     tokio::io::stdin(),
//!     tokio::io::stdout(),
//!     LinkConfig::default(),
//!     &mut tx,
//!     None,
//! )
//! .await?;
//! println!("{} frames", stats.frames_received);
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod dispatch;
pub mod emitter;
pub mod link;

// Re-export main types
pub use dispatch::{EventSink, FrameDispatcher, LinkEvent, Outcome, Response};
pub use emitter::ResponseEmitter;
pub use link::{run_link, Link, LinkConfig, LinkError, LinkStats, DEFAULT_READ_CHUNK_SIZE};
