mod pattern;
mod scanner;
mod set;

pub use pattern::{Pattern, PatternSpec};
pub use scanner::{Matches, SCAN_CHUNK_SIZE, Scanner};
pub use set::{PatternSet, SitePatterns, load_pattern_set, save_pattern_set};
