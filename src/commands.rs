use std::io::{self, Write};
use std::str::FromStr;

use anyhow::{Context, Result};
use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::controller::StreamingCompletionController;
use crate::events::{AskRequest, ChatEvent, Domain, Role};
use crate::session::SessionKey;

/// Commands that can be invoked by starting a message with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Switch the grounding domain (normal, healthcare, finance)
    Domain,
    /// Clear the conversation history
    Reset,
    /// Print the conversation history
    History,
    /// Show help
    Help,
    /// Exit the application
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Domain => "switch the knowledge domain (normal, healthcare, finance)",
            SlashCommand::Reset => "forget the conversation so far",
            SlashCommand::History => "show the conversation so far",
            SlashCommand::Help => "show available commands",
            SlashCommand::Bye => "exit the application",
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let rest = input.trim().strip_prefix('/')?;

    let mut parts = rest.split_whitespace();
    let head = parts.next()?.to_lowercase();
    let tail: Vec<&str> = parts.collect();

    let command = SlashCommand::from_str(&head).ok().or_else(|| match head.as_str() {
        "q" | "quit" | "exit" => Some(SlashCommand::Bye),
        "d" | "mode" => Some(SlashCommand::Domain),
        "clear" => Some(SlashCommand::Reset),
        "h" | "?" => Some(SlashCommand::Help),
        _ => None,
    })?;

    let argument = if tail.is_empty() {
        None
    } else {
        Some(tail.join(" "))
    };

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for command in SlashCommand::iter() {
        help.push_str(&format!("/{} - {}\n", command.command(), command.description()));
    }
    help.push_str("\nAliases: /q for /bye, /d for /domain, /clear for /reset");
    help
}

/// What the REPL should do after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    Print(String),
    Exit,
}

/// Run a slash command against the session.
pub async fn apply_command(
    controller: &StreamingCompletionController,
    key: &SessionKey,
    parsed: &ParsedCommand,
) -> CommandOutcome {
    match parsed.command {
        SlashCommand::Domain => match parsed.argument() {
            Some(selector) => {
                let before = controller.sessions().selected_domain(key);
                let after = controller.select_domain(key, selector);
                if before == after && Domain::parse_selector(selector).is_none() {
                    CommandOutcome::Print(format!(
                        "Unknown domain '{}', staying with {}",
                        selector.trim(),
                        after
                    ))
                } else {
                    CommandOutcome::Print(format!("Domain set to {}", after))
                }
            }
            None => CommandOutcome::Print(format!(
                "Current domain: {}",
                controller.sessions().selected_domain(key)
            )),
        },
        SlashCommand::Reset => CommandOutcome::Print(controller.reset(key).await.status),
        SlashCommand::History => {
            let history = controller.history(key);
            if history.is_empty() {
                return CommandOutcome::Print("No conversation yet.".to_string());
            }
            let lines: Vec<String> = history
                .iter()
                .map(|turn| match turn.role {
                    Role::User => format!("You: {}", turn.content),
                    Role::Assistant => format!("Assistant: {}", turn.content),
                })
                .collect();
            CommandOutcome::Print(lines.join("\n"))
        }
        SlashCommand::Help => CommandOutcome::Print(get_help_text()),
        SlashCommand::Bye => CommandOutcome::Exit,
    }
}

/// Interactive text chat on stdin/stdout
pub async fn run_chat(
    controller: StreamingCompletionController,
    domain: Option<String>,
) -> Result<()> {
    let key = SessionKey::generate();
    if let Some(selector) = domain.as_deref() {
        controller.select_domain(&key, selector);
    }

    println!(
        "Chatting in the {} domain. Type /help for commands.",
        controller.sessions().selected_domain(&key)
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        io::stdout().flush()?;

        let Some(line) = lines.next_line().await.context("Failed to read user input")? else {
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }

        if let Some(parsed) = parse_slash_command(input) {
            match apply_command(&controller, &key, &parsed).await {
                CommandOutcome::Print(message) => println!("{}", message),
                CommandOutcome::Exit => break,
            }
            continue;
        }

        let events = controller.stream_turn(&key, AskRequest::new(input)).await?;
        print_stream(events).await?;
    }

    println!("Bye!");
    Ok(())
}

/// One-shot question; prints the whole reply, or the JSON response body
/// when `json` is set.
pub async fn ask_once(
    controller: StreamingCompletionController,
    text: String,
    domain: Option<String>,
    json: bool,
) -> Result<()> {
    let key = SessionKey::generate();
    let mut request = AskRequest::new(text);
    request.domain = domain;

    if json {
        let body = match controller.respond(&key, request).await {
            Ok(body) => serde_json::to_string(&body),
            Err(body) => serde_json::to_string(&body),
        }
        .context("Failed to serialize response")?;
        println!("{}", body);
        return Ok(());
    }

    let reply = controller.ask(&key, request).await?;
    println!("{}", reply);
    Ok(())
}

async fn print_stream(mut events: tokio::sync::mpsc::Receiver<ChatEvent>) -> Result<()> {
    let mut stdout = io::stdout();
    while let Some(event) = events.recv().await {
        match event {
            ChatEvent::Chunk(chunk) => {
                write!(stdout, "{}", chunk)?;
                stdout.flush()?;
            }
            ChatEvent::Done => {
                writeln!(stdout)?;
                break;
            }
            ChatEvent::Error(message) => {
                writeln!(stdout)?;
                eprintln!("Error: {}", message);
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn controller() -> StreamingCompletionController {
        StreamingCompletionController::from_config(&Config::default()).unwrap()
    }

    #[test]
    fn parses_commands_and_aliases() {
        assert_eq!(
            parse_slash_command("/domain healthcare"),
            Some(ParsedCommand {
                command: SlashCommand::Domain,
                argument: Some("healthcare".to_string()),
            })
        );
        assert_eq!(parse_slash_command("/q").unwrap().command, SlashCommand::Bye);
        assert_eq!(parse_slash_command(" /CLEAR ").unwrap().command, SlashCommand::Reset);
        assert_eq!(parse_slash_command("/history").unwrap().argument, None);
        assert!(parse_slash_command("hello").is_none());
        assert!(parse_slash_command("/nonsense").is_none());
        assert!(parse_slash_command("/").is_none());
    }

    #[test]
    fn help_lists_every_command() {
        let help = get_help_text();
        for command in SlashCommand::iter() {
            assert!(help.contains(&format!("/{}", command.command())));
        }
    }

    #[tokio::test]
    async fn domain_command_switches_and_reports_fallback() {
        let controller = controller();
        let key = SessionKey::from("repl");

        let outcome = apply_command(&controller, &key, &parse_slash_command("/domain finance").unwrap()).await;
        assert_eq!(outcome, CommandOutcome::Print("Domain set to finance".to_string()));

        let outcome = apply_command(&controller, &key, &parse_slash_command("/domain astrology").unwrap()).await;
        assert_eq!(
            outcome,
            CommandOutcome::Print("Unknown domain 'astrology', staying with finance".to_string())
        );

        let outcome = apply_command(&controller, &key, &parse_slash_command("/domain").unwrap()).await;
        assert_eq!(outcome, CommandOutcome::Print("Current domain: finance".to_string()));
    }

    #[tokio::test]
    async fn reset_history_and_bye() {
        let controller = controller();
        let key = SessionKey::from("repl");
        controller.sessions().append_user(&key, "hi").unwrap();
        controller.sessions().append_assistant(&key, "hello!");

        let outcome = apply_command(&controller, &key, &parse_slash_command("/history").unwrap()).await;
        assert_eq!(outcome, CommandOutcome::Print("You: hi\nAssistant: hello!".to_string()));

        let outcome = apply_command(&controller, &key, &parse_slash_command("/reset").unwrap()).await;
        assert_eq!(outcome, CommandOutcome::Print("context reset".to_string()));
        assert!(controller.history(&key).is_empty());

        let outcome = apply_command(&controller, &key, &parse_slash_command("/bye").unwrap()).await;
        assert_eq!(outcome, CommandOutcome::Exit);
    }
}
