//! # External Collaborators
//!
//! The three opaque services the relay consumes: speech-to-text, language
//! model, and text-to-speech. Each sits behind a narrow async trait so the
//! pipeline can be driven by HTTP-backed implementations in production and
//! by test doubles everywhere else.
//!
//! ## Failure policy:
//! Service errors are returned to the pipeline, which logs them with cause
//! and surfaces a generic user-visible message. The synthesizer is special:
//! its HTTP implementation degrades to silent audio instead of failing, so
//! the client always gets something playable.

pub mod responder;
pub mod synthesizer;
pub mod transcriber;

pub use responder::{HttpResponder, Responder};
pub use synthesizer::{HttpSynthesizer, Synthesizer};
pub use transcriber::{HttpTranscriber, Transcriber};
