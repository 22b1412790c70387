//! User-facing dialogs used by the local server lifecycle.

use std::io::{self, BufRead, Write};

/// Blocking dialogs shown to the user.
///
/// The desktop front end implements this with message boxes; the headless
/// binary uses [`ConsolePrompt`].
pub trait UserPrompt {
    /// Show a blocking error message.
    fn critical(&self, title: &str, message: &str);
    /// Ask a yes/no question. Anything but an explicit yes is a no.
    fn question(&self, title: &str, message: &str) -> bool;
}

/// Prompts on the terminal: errors go to stderr, questions read stdin.
pub struct ConsolePrompt;

impl UserPrompt for ConsolePrompt {
    fn critical(&self, title: &str, message: &str) {
        log::error!("{}: {}", title, message);
        eprintln!("{}: {}", title, message);
    }

    fn question(&self, title: &str, message: &str) -> bool {
        eprint!("{}: {} [y/N] ", title, message);
        let _ = io::stderr().flush();
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(_) => is_yes(&answer),
            Err(e) => {
                log::warn!("Could not read answer from stdin: {}", e);
                false
            }
        }
    }
}

fn is_yes(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_explicit_yes_confirms() {
        assert!(is_yes("y\n"));
        assert!(is_yes(" YES "));
        assert!(!is_yes(""));
        assert!(!is_yes("n"));
        assert!(!is_yes("sure"));
    }
}
