//! Process observation: enumeration, watchlist matching and termination

pub mod candidates;
pub mod matcher;
pub mod process_source;
pub mod process_tracker;
pub mod scanner;
pub mod terminator;

pub use matcher::{match_process, Matcher};
pub use process_source::{ProcessSource, ScanError, SysinfoSource};
pub use process_tracker::ProcessTracker;
pub use scanner::{Detection, Scanner, SkipRules};
pub use terminator::{SignalTerminator, Terminator};
