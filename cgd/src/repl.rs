//! Terminal chat front end
//!
//! Runs the same orchestrator the server uses, with this terminal standing in
//! for the client: outbound messages are printed and questions are answered
//! from the readline prompt.

use colored::Colorize;
use eyre::Result;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::domain::{Phase, TenantContext};
use crate::session::{Outbound, SessionRegistry};
use crate::workflow::Orchestrator;

const SESSION_ID: &str = "terminal";

/// Interactive chat session
pub struct ChatSession {
    orchestrator: Orchestrator,
    registry: SessionRegistry,
    tenant: TenantContext,
}

/// What the human typed at a prompt
enum Input {
    Line(String),
    Quit,
    Skip,
}

impl ChatSession {
    pub fn new(orchestrator: Orchestrator, tenant: TenantContext) -> Self {
        debug!(location_id = %tenant.location.id, "ChatSession::new: called");
        Self {
            orchestrator,
            registry: SessionRegistry::new(),
            tenant,
        }
    }

    /// Run the chat main loop
    pub async fn run(&mut self) -> Result<()> {
        self.print_welcome();
        let mut rl = DefaultEditor::new().map_err(|e| eyre::eyre!("Failed to initialize readline: {}", e))?;

        loop {
            match read_input(&mut rl, &format!("{} ", ">".bright_green()))? {
                Input::Quit => break,
                Input::Skip => continue,
                Input::Line(line) if line.starts_with('/') => {
                    if !self.handle_slash_command(&line) {
                        break;
                    }
                }
                Input::Line(request) => self.converse(&mut rl, request).await?,
            }
        }

        println!("Goodbye!");
        Ok(())
    }

    /// Drive one conversation to its end
    async fn converse(&self, rl: &mut DefaultEditor, request: String) -> Result<()> {
        info!("Starting terminal conversation");
        let (tx, mut rx) = mpsc::channel(64);
        let handle = self
            .orchestrator
            .start(&self.registry, SESSION_ID, request, self.tenant.clone(), tx)
            .await;

        // The channel closes once the conversation task drops its sender
        while let Some(message) = rx.recv().await {
            if let Some(text) = render(&message) {
                println!("{}", text);
            }
            let Some(question_id) = message.question_id() else {
                continue;
            };
            match read_input(rl, &format!("{} ", "?".bright_yellow()))? {
                Input::Line(answer) if answer == "/reset" => {
                    self.registry.reset(SESSION_ID).await;
                    println!("{}", "Conversation reset.".dimmed());
                }
                Input::Line(answer) => {
                    self.registry.resolve(SESSION_ID, question_id, &answer).await;
                }
                // A blank answer still counts
                Input::Skip => {
                    self.registry.resolve(SESSION_ID, question_id, "").await;
                }
                Input::Quit => {
                    self.registry.reset(SESSION_ID).await;
                }
            }
        }

        match handle.await {
            Ok(Ok(Phase::Done)) => println!("{}", "Campaign scheduled.".bright_green()),
            Ok(Ok(phase)) => debug!(%phase, "converse: conversation ended"),
            Ok(Err(e)) => println!("{} {}", "Error:".bright_red(), e),
            Err(e) if e.is_cancelled() => debug!("converse: conversation task aborted"),
            Err(e) => return Err(eyre::eyre!("Conversation task failed: {}", e)),
        }
        Ok(())
    }

    fn print_welcome(&self) {
        println!();
        println!("{}", "Campaign Builder".bright_cyan().bold());
        if let Some(id) = self.tenant.tenant_id() {
            let name = if self.tenant.location.name.is_empty() {
                "(unnamed)"
            } else {
                self.tenant.location.name.as_str()
            };
            println!("Location: {} [{}]", name, id);
        }
        println!("Describe a campaign to get started.");
        println!("Type {} for help, {} to quit", "/help".yellow(), "/quit".yellow());
        println!();
    }

    /// Returns false when the session should end
    fn handle_slash_command(&self, input: &str) -> bool {
        let cmd = input.split_whitespace().next().unwrap_or("");
        match cmd {
            "/help" | "/h" => {
                println!("{}", "Commands:".bright_cyan());
                println!("  {}  Show this help", "/help".yellow());
                println!("  {}  Abandon the current conversation (while answering)", "/reset".yellow());
                println!("  {}  Exit", "/quit".yellow());
                true
            }
            "/quit" | "/exit" | "/q" => false,
            "/reset" => {
                println!("{}", "No conversation in progress.".dimmed());
                true
            }
            other => {
                println!("{} {}", "Unknown command:".bright_red(), other);
                true
            }
        }
    }
}

fn read_input(rl: &mut DefaultEditor, prompt: &str) -> Result<Input> {
    match rl.readline(prompt) {
        Ok(line) => {
            let input = line.trim();
            if input.is_empty() {
                return Ok(Input::Skip);
            }
            let _ = rl.add_history_entry(input);
            if matches!(input, "/quit" | "/exit" | "/q") {
                return Ok(Input::Quit);
            }
            Ok(Input::Line(input.to_string()))
        }
        Err(ReadlineError::Interrupted) => {
            println!("^C");
            Ok(Input::Skip)
        }
        Err(ReadlineError::Eof) => {
            println!();
            Ok(Input::Quit)
        }
        Err(err) => Err(eyre::eyre!("Readline error: {}", err)),
    }
}

/// Terminal rendering of an outbound message; `None` for messages with no
/// terminal representation
pub fn render(message: &Outbound) -> Option<String> {
    match message {
        Outbound::Assistant { message } => Some(message.clone()),
        Outbound::System { message } => Some(message.dimmed().to_string()),
        Outbound::Error { message } => Some(format!("{} {}", "!".bright_red(), message)),
        Outbound::User { message } => Some(format!("{} {}", ">".bright_green(), message)),
        Outbound::Question { message, .. } => Some(message.bright_white().to_string()),
        Outbound::Options { message, options, .. } => {
            let mut lines = vec![message.bright_white().to_string()];
            for option in options {
                if option.description.is_empty() {
                    lines.push(format!("  [{}] {}", option.id.yellow(), option.label));
                } else {
                    lines.push(format!("  [{}] {} - {}", option.id.yellow(), option.label, option.description));
                }
            }
            Some(lines.join("\n"))
        }
        Outbound::AssistantThinking { message, .. } => Some(message.italic().dimmed().to_string()),
        Outbound::UiAction { action, .. } => {
            debug!(%action, "render: ui action has no terminal form");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ChoiceOption;
    use serde_json::json;

    #[test]
    fn test_render_options_lists_choices() {
        colored::control::set_override(false);
        let message = Outbound::Options {
            question_id: "segment_choice_1".to_string(),
            message: "Which segment?".to_string(),
            options: vec![
                ChoiceOption::new("0", "Create a new segment", ""),
                ChoiceOption::new("1", "VIPs", "score 0.92"),
            ],
        };
        assert_eq!(
            render(&message).unwrap(),
            "Which segment?\n  [0] Create a new segment\n  [1] VIPs - score 0.92"
        );
    }

    #[test]
    fn test_render_skips_ui_actions() {
        let message = Outbound::UiAction {
            action: "navigate".to_string(),
            payload: json!({"path": "/"}),
        };
        assert!(render(&message).is_none());
        assert!(
            render(&Outbound::Assistant {
                message: "hi".to_string()
            })
            .is_some()
        );
    }
}
