pub mod command;
pub mod config;
pub mod error;
pub mod mqtt;
pub mod publish;
pub mod topics;
pub mod update;

/// Install the fmt subscriber used by both binaries. `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
}
