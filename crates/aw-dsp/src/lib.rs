//! aw-dsp: UHJ encoding DSP core
//!
//! Converts first-order ambisonic (B-format) audio into a 2-channel UHJ
//! stereo-compatible signal:
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐     ┌─────────────┐
//! │ Panner       │────▶│ UhjEncoder   │────▶│ L/R output  │
//! │              │     │              │     │             │
//! │ - layouts    │     │ - UHJ matrix │     │ - stereo    │
//! │ - B-format   │     │ - +90° shift │     │   carrier   │
//! └──────────────┘     └──────────────┘     └─────────────┘
//! ```
//!
//! Speaker-fed inputs are panned into a W/X/Y/Z intermediate first; direct
//! B-format inputs bypass panning.

mod layout;
mod phase_shifter;
mod uhj;

pub use layout::*;
pub use phase_shifter::*;
pub use uhj::*;
