//! UI utilities for the terminal frontend.

use std::io::Write;

/// Redisplay the prompt after printing a message
pub fn redisplay_prompt() {
    print!("> ");
    std::io::stdout().flush().ok();
}
