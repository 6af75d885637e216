//! Utility modules

pub mod content_type;
pub mod text;

pub use content_type::{guess_content_type, is_likely_binary, MAX_SNIFF_SIZE};
pub use text::{strip_final_terminator, LineTerminator};
