use tracing_subscriber::EnvFilter;

use super::LoggingConfig;

/// `RUST_LOG` when set, otherwise the directive built from `config`.
/// An unparsable directive falls back to `info`.
pub fn build_filter_from_config(config: &LoggingConfig) -> EnvFilter {
    if let Ok(env_filter) = EnvFilter::try_from_default_env() {
        return env_filter;
    }
    let directive = config.build_filter_directive();
    EnvFilter::try_new(&directive).unwrap_or_else(|e| {
        eprintln!("invalid log filter directive '{directive}': {e}; falling back to 'info'");
        EnvFilter::new("info")
    })
}

#[cfg(test)]
mod tests {
    use std::{
        env,
        sync::{Arc, Mutex},
    };

    use serial_test::serial;
    use tracing_subscriber::{fmt, prelude::*, registry::Registry};

    use super::*;

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct VecMakeWriter(Arc<Mutex<Vec<u8>>>);

    impl VecMakeWriter {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl<'a> fmt::MakeWriter<'a> for VecMakeWriter {
        type Writer = VecWriterGuard;

        fn make_writer(&'a self) -> Self::Writer {
            VecWriterGuard(self.0.clone())
        }
    }

    struct VecWriterGuard(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for VecWriterGuard {
        fn write(
            &mut self,
            buf: &[u8],
        ) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    #[serial]
    fn test_config_directive_filters_levels() {
        env::remove_var("RUST_LOG");
        let cfg = LoggingConfig::default().with_level("warn");
        let writer = VecMakeWriter::default();
        let layer = fmt::layer()
            .with_writer(writer.clone())
            .with_ansi(false)
            .with_filter(build_filter_from_config(&cfg));
        let _guard = tracing::subscriber::set_default(Registry::default().with(layer));

        tracing::info!(target: "redmux::mux", "info is filtered out");
        tracing::warn!(target: "redmux::mux", "warn passes through");

        let out = writer.contents();
        assert!(out.contains("warn passes through"));
        assert!(!out.contains("info is filtered out"));
    }

    #[test]
    #[serial]
    fn test_rust_log_wins() {
        env::set_var("RUST_LOG", "error");
        let cfg = LoggingConfig::default().with_level("trace");
        let writer = VecMakeWriter::default();
        let layer = fmt::layer()
            .with_writer(writer.clone())
            .with_ansi(false)
            .with_filter(build_filter_from_config(&cfg));
        env::remove_var("RUST_LOG");
        let _guard = tracing::subscriber::set_default(Registry::default().with(layer));

        tracing::debug!(target: "redmux", "debug is filtered out");
        tracing::error!(target: "redmux", "error passes through");

        let out = writer.contents();
        assert!(out.contains("error passes through"));
        assert!(!out.contains("debug is filtered out"));
    }

    #[test]
    #[serial]
    fn test_invalid_directive_falls_back() {
        env::remove_var("RUST_LOG");
        let mut cfg = LoggingConfig::default();
        cfg.directives.push("redmux=[[".into());
        // Must not panic.
        let _ = build_filter_from_config(&cfg);
    }
}
