//! Line-oriented keyboard commands read from stdin.

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::LinesStream;
use tracing::debug;

use super::{Command, CommandSender, Verb};

pub const HELP: &str = "keys: d=dump  c=clear  s=status  t=list tabs  <n>=switch to tab n  p=pause  r=resume  q=quit";

/// What one input line asks for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyInput {
	Command(Verb),
	Help,
	Ignore,
}

pub fn parse_line(line: &str) -> KeyInput {
	let key = line.trim();
	if key.is_empty() {
		return KeyInput::Ignore;
	}
	if let Ok(index) = key.parse::<usize>() {
		return KeyInput::Command(Verb::SwitchTab { index });
	}
	let verb = match key.to_ascii_lowercase().as_str() {
		"d" | "dump" => Verb::Dump,
		"c" | "clear" => Verb::Clear,
		"s" | "status" => Verb::Status,
		"t" | "tabs" => Verb::ListTabs,
		"p" | "pause" => Verb::Pause,
		"r" | "resume" => Verb::Resume,
		"q" | "quit" | "stop" => Verb::Stop,
		_ => return KeyInput::Help,
	};
	KeyInput::Command(verb)
}

/// Reads stdin until EOF, forwarding commands. EOF does not stop the session.
pub fn spawn(commands: CommandSender) -> JoinHandle<()> {
	tokio::spawn(async move {
		let mut lines = LinesStream::new(BufReader::new(tokio::io::stdin()).lines());
		while let Some(line) = lines.next().await {
			let Ok(line) = line else { break };
			match parse_line(&line) {
				KeyInput::Command(verb) => {
					if commands.send(Command::keyboard(verb)).is_err() {
						break;
					}
				}
				KeyInput::Help => eprintln!("{HELP}"),
				KeyInput::Ignore => {}
			}
		}
		debug!(target = "pagewatch.control", "keyboard input closed");
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn keys_map_to_verbs() {
		assert_eq!(parse_line("d\n"), KeyInput::Command(Verb::Dump));
		assert_eq!(parse_line(" T "), KeyInput::Command(Verb::ListTabs));
		assert_eq!(parse_line("2"), KeyInput::Command(Verb::SwitchTab { index: 2 }));
		assert_eq!(parse_line("q"), KeyInput::Command(Verb::Stop));
		assert_eq!(parse_line(""), KeyInput::Ignore);
		assert_eq!(parse_line("?"), KeyInput::Help);
		assert_eq!(parse_line("-1"), KeyInput::Help);
	}
}
