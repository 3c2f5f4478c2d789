use std::sync::Once;

use coalesce_shared::log::LevelFilter;

pub use spectral;

/// Installs a logger that prints everything down to `trace` so that failing tests show the aggregation passes.
///
/// Can be called from every test. Only the first call installs the logger.
pub fn setup_logger() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        simple_logger::SimpleLogger::new()
            .with_level(LevelFilter::Trace)
            .init()
            .unwrap_or_else(|err| eprintln!("Failed to install the test logger: {err}"));
    });
}
