pub mod diagnostics;
pub mod outcome;
pub mod progress;
pub mod timings;
