//! Synthesis dispatch: request validation, model selection and post-processing.

mod dispatch;
mod request;

pub use dispatch::{SynthesisOutput, Synthesizer};
pub use request::{
    ReferenceAudio, SynthesisRequest, ValidationLimits, MAX_DESCRIPTION_CHARS, MAX_FACTOR,
    MAX_INSTRUCTION_CHARS, MIN_DESCRIPTION_CHARS, MIN_FACTOR,
};
