//! Logging bootstrap. The excluded CLI/config collaborator owns the
//! on-disk log *format*; this module just wires the `log` facade to a
//! sane default so every component can call `log::info!` etc. from the
//! moment the process starts.

use lazy_static::lazy_static;
use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use std::sync::Once;

lazy_static! {
	static ref INIT: Once = Once::new();
}

/// Initialize the global logger. Safe to call more than once; only the
/// first call takes effect.
pub fn init(level: LevelFilter) {
	INIT.call_once(|| {
		let stdout = ConsoleAppender::builder().build();
		let config = Config::builder()
			.appender(Appender::builder().build("stdout", Box::new(stdout)))
			.build(Root::builder().appender("stdout").build(level))
			.expect("build default log4rs config");
		if let Err(e) = log4rs::init_config(config) {
			eprintln!("logger already initialized: {}", e);
		}
	});
}

/// Initialize at the default (info) level. Convenience for tests and the
/// node binary's `main`.
pub fn init_default() {
	init(LevelFilter::Info)
}
