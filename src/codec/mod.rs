//! Frame I/O over an async byte stream: masked client frames in, unmasked
//! server frames out.

#[cfg(feature = "async-tokio")]
mod framed;

#[cfg(feature = "async-tokio")]
pub use framed::WebSocketCodec;
