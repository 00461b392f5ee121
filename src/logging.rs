use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// Install the global subscriber. Log lines go to stderr so command replies
/// on stdout stay readable.
pub(crate) fn init(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();
}
