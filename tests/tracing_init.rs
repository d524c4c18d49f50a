//! Runs in its own test binary because `init` installs the process-global
//! subscriber, which conflicts with `#[traced_test]` unit tests in the lib.

use fieldbus_scope::tracing_setup::{init, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    init(TracingConfig::new(Level::INFO).with_format(OutputFormat::Compact)).unwrap();
    init(TracingConfig::default()).unwrap();
}
