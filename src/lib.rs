//! DTS to stereo LPCM downmix element.
//!
//! [`DtsDownmix`] sits between a DTS parser and an LPCM sink. It accepts
//! DTS elementary stream chunks of any size, downmixes every frame to
//! stereo through libdca and pushes DVD-style LPCM packets with running
//! timestamps.
//!
//! While the element is running the platform's hardware clock sync is
//! forced to follow audio; the previous setting comes back when the
//! element stops.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use dtsdownmix::{DtsDownmix, ElementConfig, ProcFs, StateChange};
//! use dca_stream::ffi::LibDca;
//!
//! let config = ElementConfig::from_path("/etc/dtsdownmix.yaml")?;
//! dtsdownmix::logging::init(&config.logging)?;
//! let platform = Arc::new(ProcFs::new(config.platform.clone()));
//! let mut element: DtsDownmix<LibDca, _, _> = DtsDownmix::new(config, platform, sink)?;
//! element.change_state(StateChange::NullToReady)?;
//! element.change_state(StateChange::ReadyToPaused)?;
//! element.chain(chunk)?;
//! ```

pub mod config;
pub mod element;
pub mod framework;
pub mod logging;
pub mod platform;

pub use config::{ConfigError, ElementConfig};
pub use element::{DtsDownmix, StateChangeError};
pub use framework::{Downstream, Event, FlowError, InputChunk, METADATA, StateChange};
pub use platform::{PlatformSettings, ProcFs};

/// The element wired to the system libdca and the proc-file switches.
#[cfg(feature = "libdca")]
pub type LibDcaDownmix<D> = DtsDownmix<dca_stream::ffi::LibDca, ProcFs, D>;
