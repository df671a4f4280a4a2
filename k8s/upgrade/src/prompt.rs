use crate::common::error::{Aborted, EmptySelection, Prompt, Result};
use async_trait::async_trait;
use snafu::{ensure, ResultExt};
use std::io::Write;
use tokio::{
    io::{stdin, AsyncBufReadExt, BufReader, Lines, Stdin},
    sync::Mutex,
};

/// The decision points of the upgrade which need an answer from the operator.
#[async_trait]
pub trait Prompter: Send + Sync {
    /// A yes/no question.
    async fn confirm(&self, message: &str) -> Result<bool>;

    /// A free-form answer, trimmed.
    async fn input(&self, message: &str) -> Result<String>;

    /// Pick one of the choices. Returns the index of the choice.
    async fn select(&self, message: &str, choices: &[String]) -> Result<usize>;
}

/// Asks the questions on stdout and reads the answers from stdin. A closed stdin aborts the
/// upgrade.
pub struct StdinPrompter {
    lines: Mutex<Lines<BufReader<Stdin>>>,
}

impl Default for StdinPrompter {
    fn default() -> Self {
        Self {
            lines: Mutex::new(BufReader::new(stdin()).lines()),
        }
    }
}

impl StdinPrompter {
    pub fn new() -> Self {
        Self::default()
    }

    async fn ask(&self, question: &str) -> Result<String> {
        print!("? {question} ");
        std::io::stdout().flush().context(Prompt)?;

        let line = self.lines.lock().await.next_line().await.context(Prompt)?;
        match line {
            Some(answer) => Ok(answer.trim().to_string()),
            None => Aborted.fail(),
        }
    }
}

#[async_trait]
impl Prompter for StdinPrompter {
    async fn confirm(&self, message: &str) -> Result<bool> {
        loop {
            let answer = self.ask(format!("{message} (y/n)").as_str()).await?;
            match parse_confirmation(answer.as_str()) {
                Some(confirmed) => return Ok(confirmed),
                None => println!("  Please answer 'y' or 'n'."),
            }
        }
    }

    async fn input(&self, message: &str) -> Result<String> {
        self.ask(message).await
    }

    async fn select(&self, message: &str, choices: &[String]) -> Result<usize> {
        ensure!(!choices.is_empty(), EmptySelection { message });

        println!("? {message}");
        for (index, choice) in choices.iter().enumerate() {
            println!("  {}) {choice}", index + 1);
        }
        loop {
            let answer = self.ask(format!("Choice [1-{}]:", choices.len()).as_str()).await?;
            match parse_choice(answer.as_str(), choices.len()) {
                Some(index) => return Ok(index),
                None => println!("  Please enter a number between 1 and {}.", choices.len()),
            }
        }
    }
}

fn parse_confirmation(answer: &str) -> Option<bool> {
    match answer.to_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Parse a 1-based choice into an index.
fn parse_choice(answer: &str, count: usize) -> Option<usize> {
    answer
        .parse::<usize>()
        .ok()
        .filter(|choice| (1..=count).contains(choice))
        .map(|choice| choice - 1)
}

#[cfg(test)]
pub(crate) use scripted::{Answer, ScriptedPrompter};
