//! Codec factories: the "opaque factories" collaborator of spec §1.
//!
//! The session/media core only needs a declared sample rate, channel count,
//! frame time and payload size plus `encode`/`decode` — codec internals
//! (G.729, Opus, …) are somebody else's problem. This crate fixes that
//! contract and ships G.711 (μ-law/A-law) as a reference codec, which is
//! also what most interop targets in spec §8's scenarios actually negotiate.

pub mod error;
pub mod g711;
pub mod registry;

pub use error::{CodecError, Result};
pub use registry::{CodecDescriptor, CodecFactory, CodecRegistry, Decoder, Encoder};
