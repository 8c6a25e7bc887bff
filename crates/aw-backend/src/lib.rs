//! aw-backend: real-time audio server backend
//!
//! Bridges an application's device abstraction to a low-latency audio
//! server:
//!
//! ```text
//! ┌──────────────┐     ┌───────────────┐     ┌──────────────┐
//! │ EventManager │────▶│ DeviceList    │     │ Playback/    │
//! │              │     │               │◀────│ Capture      │
//! │ - registry   │     │ - nodes       │     │ streams      │
//! │ - proxies    │     │ - defaults    │     │              │
//! └──────────────┘     └───────────────┘     └──────────────┘
//! ```
//!
//! The server's client library sits behind the [`server`] trait boundary;
//! everything above it (registry tracking, format negotiation, stream
//! lifecycle, clock/latency reporting) lives here. All callbacks for a
//! connection run on that connection's cooperative loop thread; application
//! threads synchronize by locking the loop.

mod capture;
mod device;
mod error;
mod event_manager;
mod mainloop;
mod playback;
mod proxy;
mod ringbuf;
pub mod server;

pub use capture::*;
pub use device::*;
pub use error::*;
pub use event_manager::*;
pub use mainloop::*;
pub use playback::*;
pub use ringbuf::*;

use once_cell::sync::Lazy;
use std::time::Instant;

/// Lowest sample rate a device format may negotiate.
pub const MIN_OUTPUT_RATE: u32 = 8_000;
/// Highest sample rate a device format may negotiate.
pub const MAX_OUTPUT_RATE: u32 = 192_000;
/// Upper bound on stream channel counts.
pub const MAX_OUTPUT_CHANNELS: usize = 16;

static MONO_EPOCH: Lazy<Instant> = Lazy::new(Instant::now);

/// Monotonic timestamp in nanoseconds, on the same timebase the server
/// reports stream times in.
pub fn monotonic_ns() -> i64 {
    MONO_EPOCH.elapsed().as_nanos() as i64
}
