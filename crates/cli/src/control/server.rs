//! Newline-delimited JSON control socket.
//!
//! Each request line is one [`Verb`]; each gets exactly one [`CommandReply`]
//! line, written once the session loop has processed the command. A Unix
//! socket is used where available; on Windows the server listens on an
//! ephemeral `127.0.0.1` port and writes the address into the socket path.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(windows)]
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::protocol::{CommandReply, Verb};
use super::{Command, CommandSender};

pub struct ControlServer {
	path: PathBuf,
	#[cfg(unix)]
	listener: UnixListener,
	#[cfg(windows)]
	listener: TcpListener,
}

impl ControlServer {
	pub async fn bind(path: &Path) -> Result<Self> {
		if let Some(parent) = path.parent() {
			if !parent.as_os_str().is_empty() {
				std::fs::create_dir_all(parent).with_context(|| format!("Failed to create socket directory: {}", parent.display()))?;
			}
		}

		#[cfg(unix)]
		{
			if path.exists() {
				std::fs::remove_file(path).with_context(|| format!("Failed to remove stale socket: {}", path.display()))?;
			}
			let listener = UnixListener::bind(path).with_context(|| format!("Failed to bind control socket: {}", path.display()))?;
			info!(target = "pagewatch.control", socket = %path.display(), "control socket listening");
			Ok(Self {
				path: path.to_path_buf(),
				listener,
			})
		}

		#[cfg(windows)]
		{
			let listener = TcpListener::bind("127.0.0.1:0").await.context("Failed to bind control TCP socket")?;
			let addr = listener.local_addr().context("Failed to read control socket address")?;
			std::fs::write(path, addr.to_string()).with_context(|| format!("Failed to write control address: {}", path.display()))?;
			info!(target = "pagewatch.control", addr = %addr, "control socket listening");
			Ok(Self {
				path: path.to_path_buf(),
				listener,
			})
		}
	}

	pub fn path(&self) -> &Path {
		&self.path
	}

	/// Accepts clients until `stop` flips to true or the session loop goes away.
	pub async fn run(self, commands: CommandSender, mut stop: watch::Receiver<bool>) -> Result<()> {
		loop {
			tokio::select! {
				changed = stop.changed() => {
					if changed.is_err() || *stop.borrow() {
						break;
					}
				}
				_ = commands.closed() => break,
				accept = self.listener.accept() => {
					let (stream, _) = accept.context("Control socket accept failed")?;
					let commands = commands.clone();
					tokio::spawn(async move {
						if let Err(err) = handle_client(stream, commands).await {
							warn!(target = "pagewatch.control", error = %err, "control connection error");
						}
					});
				}
			}
		}
		debug!(target = "pagewatch.control", "control socket closed");
		Ok(())
	}
}

impl Drop for ControlServer {
	fn drop(&mut self) {
		let _ = std::fs::remove_file(&self.path);
	}
}

async fn handle_client<S>(stream: S, commands: CommandSender) -> Result<()>
where
	S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin,
{
	let (read_half, mut write_half) = tokio::io::split(stream);
	let mut reader = BufReader::new(read_half);
	let mut line = String::new();

	loop {
		line.clear();
		let bytes = reader.read_line(&mut line).await.context("Failed reading control request")?;
		if bytes == 0 {
			break;
		}
		if line.trim().is_empty() {
			continue;
		}

		let reply = match serde_json::from_str::<Verb>(line.trim_end()) {
			Ok(verb) => dispatch(&commands, verb).await,
			Err(err) => CommandReply::failure(format!("invalid request: {err}")),
		};
		write_reply(&mut write_half, &reply).await?;
	}

	Ok(())
}

async fn dispatch(commands: &CommandSender, verb: Verb) -> CommandReply {
	debug!(target = "pagewatch.control", verb = verb.name(), "control request");
	let (command, reply) = Command::deferred(verb);
	if commands.send(command).is_err() {
		return CommandReply::failure("session is shutting down");
	}
	reply.await.unwrap_or_else(|_| CommandReply::failure("session ended before replying"))
}

async fn write_reply<W>(writer: &mut W, reply: &CommandReply) -> Result<()>
where
	W: tokio::io::AsyncWrite + Unpin,
{
	let payload = serde_json::to_string(reply).context("Failed to serialize reply")?;
	writer.write_all(format!("{payload}\n").as_bytes()).await.context("Failed writing control reply")?;
	writer.flush().await.context("Failed flushing control reply")?;
	Ok(())
}
