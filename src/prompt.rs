use std::io::{self, BufRead, Write};

use crossterm::style::Stylize;

/// Yes/no decision source for operations that need user consent.
pub trait Confirm {
    fn confirm(&self, question: &str, default: bool) -> bool;
}

/// Answers every question the same way.
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&self, question: &str, _default: bool) -> bool {
        tracing::debug!("Auto-answering {:?}: {question}", self.0);
        self.0
    }
}

/// Asks on stderr and reads the answer from stdin.
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalPrompt;

impl Confirm for TerminalPrompt {
    fn confirm(&self, question: &str, default: bool) -> bool {
        let hint = if default { "[Y/n]" } else { "[y/N]" };
        let stdin = io::stdin();
        loop {
            let mut stderr = io::stderr();
            if write!(stderr, "{} {} ", question.bold(), hint.dark_grey())
                .and_then(|_| stderr.flush())
                .is_err()
            {
                return default;
            }
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => return default,
                Ok(_) => {}
            }
            match parse_answer(&line) {
                Some(answer) => return answer,
                None if line.trim().is_empty() => return default,
                None => {
                    let _ = writeln!(stderr, "{}", "Please respond with 'y' or 'n'.".yellow());
                }
            }
        }
    }
}

fn parse_answer(line: &str) -> Option<bool> {
    match line.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}
