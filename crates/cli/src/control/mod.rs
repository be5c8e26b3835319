//! Command surface: the keyboard and the control socket both turn input into
//! [`Command`]s for the session loop, which answers each one exactly once.

use tokio::sync::{mpsc, oneshot};

pub mod keyboard;
pub mod protocol;
pub mod server;

pub use protocol::{CommandReply, Verb};
pub use server::ControlServer;

pub type CommandSender = mpsc::UnboundedSender<Command>;
pub type CommandReceiver = mpsc::UnboundedReceiver<Command>;

pub fn channel() -> (CommandSender, CommandReceiver) {
	mpsc::unbounded_channel()
}

/// A verb plus where its reply goes.
#[derive(Debug)]
pub struct Command {
	pub verb: Verb,
	/// `None` for keyboard input; the session loop prints those replies.
	reply: Option<oneshot::Sender<CommandReply>>,
}

impl Command {
	pub fn keyboard(verb: Verb) -> Self {
		Self { verb, reply: None }
	}

	/// Command whose reply is delivered through the returned receiver.
	pub fn deferred(verb: Verb) -> (Self, oneshot::Receiver<CommandReply>) {
		let (tx, rx) = oneshot::channel();
		(Self { verb, reply: Some(tx) }, rx)
	}

	pub fn wants_reply(&self) -> bool {
		self.reply.is_some()
	}

	/// Sends `reply` back. Returns it when nobody is waiting for it.
	pub fn respond(self, reply: CommandReply) -> Option<CommandReply> {
		match self.reply {
			Some(tx) => tx.send(reply).err(),
			None => Some(reply),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn deferred_reply_reaches_waiter() {
		let (command, rx) = Command::deferred(Verb::Status);
		assert!(command.wants_reply());
		assert!(command.respond(CommandReply::done()).is_none());
		assert!(rx.await.unwrap().ok);
	}

	#[test]
	fn keyboard_reply_comes_back() {
		let command = Command::keyboard(Verb::Pause);
		assert_eq!(command.respond(CommandReply::done()), Some(CommandReply::done()));
	}
}
