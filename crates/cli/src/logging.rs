use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

/// Directives used when `RUST_LOG` is unset.
///
/// Every event carries an explicit `pagewatch.<area>` target, so the runtime's
/// protocol chatter is addressed as `pagewatch.runtime`, not by crate path.
pub fn default_directives(verbosity: u8) -> &'static str {
	match verbosity {
		0 => "error,pagewatch.runtime=off",
		1 => "warn,pagewatch.connect=info,pagewatch.bridge=info,pagewatch.session=info,pagewatch.capture=info,pagewatch.dump=info,pagewatch.control=info,pagewatch.config=info",
		_ => "debug",
	}
}

/// Installs the stderr subscriber. `RUST_LOG` wins over `verbosity`.
///
/// Captured page output never goes through here; it lands in the buffers and,
/// with `--echo`, on stdout.
pub fn init_logging(verbosity: u8) {
	let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directives(verbosity)));
	let stderr = std::io::stderr.with_max_level(tracing::Level::TRACE);

	// A second install (tests, embedding) keeps the first subscriber.
	let _ = tracing_subscriber::fmt()
		.with_env_filter(env_filter)
		.with_writer(stderr)
		.with_target(true)
		.with_level(true)
		.compact()
		.try_init();
}
