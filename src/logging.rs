use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Installs the global fmt subscriber. Safe to call more than once; later
/// calls are no-ops.
pub(crate) fn init(level: Level) {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
