//! River Stream
//!
//! Turns a streaming chat-completion response into incremental text.
//!
//! # Core Concepts
//!
//! - [`Provider`]: one variant per upstream API (request shape, delta
//!   extraction, terminator and error frames)
//! - [`SseDecoder`]: byte chunks → complete `data:` lines
//! - [`ChatTransport`]: the HTTP seam; [`HttpTransport`] wraps `reqwest`
//! - [`StreamingAggregator`]: drives one completion into a [`StreamSink`]
//!
//! # Example
//!
//! ```rust,ignore
//! use river_stream::{build_context, CompletionRequest, HttpTransport, StreamingAggregator};
//!
//! let transport = Arc::new(HttpTransport::new(Duration::from_secs(10))?);
//! let aggregator = StreamingAggregator::new(transport);
//! let request = CompletionRequest::new(model, build_context(&store, parent)?, keys);
//! let outcome = aggregator.run(&request, &mut sink).await;
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

pub mod aggregator;
pub mod context;
pub mod error;
pub mod provider;
pub mod sse;
pub mod transport;

pub use aggregator::{CompletionRequest, StreamLease, StreamOutcome, StreamSink, StreamingAggregator};
pub use context::{build_context, ChatMessage, Role};
pub use error::StreamError;
pub use provider::{EndpointConfig, Frame, HttpRequest, Provider};
pub use sse::{SseDecoder, SseLine};
pub use transport::{ByteStream, ChatTransport, HttpTransport, TransportResponse};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
