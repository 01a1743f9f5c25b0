use std::io::IsTerminal;

use kestrel_jit::{JitConfig, JitDriver};
use tracing::Level;
use tracing_subscriber::{EnvFilter, filter::Directive, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::cli::{JitOptions, LogColor, Options};

/// Install the global subscriber. Logs go to stderr so reports on stdout
/// stay machine readable.
pub fn init_tracing(opts: &Options) {
    let log_filter = EnvFilter::builder()
        .with_default_directive(Directive::from(opts.log_level))
        .from_env_lossy();

    let use_color = match opts.log_color {
        LogColor::Always => true,
        LogColor::Never => false,
        LogColor::Auto => std::io::stderr().is_terminal(),
    };

    let include_target = matches!(opts.log_level, Level::DEBUG | Level::TRACE);

    let fmt_layer = fmt::layer()
        .with_target(include_target)
        .with_ansi(use_color)
        .with_writer(std::io::stderr);

    // a second call (tests) keeps the first subscriber
    let _ = tracing_subscriber::registry()
        .with(log_filter)
        .with(fmt_layer)
        .try_init();
}

pub fn jit_config(opts: &JitOptions) -> JitConfig {
    let defaults = JitConfig::default();
    JitConfig {
        enabled: !opts.disable_jit,
        threshold_for_optimize_after_warm_up: opts.warm_up,
        threshold_for_optimize_soon: opts.warm_up.min(defaults.threshold_for_optimize_soon).max(1),
        max_code_size: opts.max_code_size,
        ..defaults
    }
}

pub fn init_driver(opts: &JitOptions) -> eyre::Result<JitDriver> {
    let config = jit_config(opts);
    tracing::debug!(
        enabled = config.enabled,
        warm_up = config.threshold_for_optimize_after_warm_up,
        max_code_size = config.max_code_size,
        "Initializing JIT driver"
    );
    Ok(JitDriver::new(config)?)
}
