//! Event tap lifecycle management
//!
//! Platform-neutral: the OS resource sits behind `TapPort`, notifications go
//! out through `TapListener`.

mod manager;

pub use manager::{
    EventSink, TapError, TapListener, TapManager, TapMode, TapPort, TapState, Verdict,
};
