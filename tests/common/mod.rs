use std::collections::VecDeque;
use std::sync::Mutex;

use refgenconf::prompt::Confirm;

/// Replays a fixed sequence of answers, then falls back to the question's
/// default. Records every question asked.
#[derive(Debug, Default)]
pub struct ScriptedAnswers {
    answers: Mutex<VecDeque<bool>>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedAnswers {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: Mutex::new(answers.into_iter().collect()),
            asked: Mutex::new(Vec::new()),
        }
    }

    pub fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Confirm for ScriptedAnswers {
    fn confirm(&self, question: &str, default: bool) -> bool {
        self.asked.lock().unwrap().push(question.to_string());
        self.answers.lock().unwrap().pop_front().unwrap_or(default)
    }
}
