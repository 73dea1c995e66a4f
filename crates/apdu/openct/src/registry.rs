//! Reader registration at driver startup

use tracing::{debug, warn};

use crate::config::DriverConfig;
use crate::error::Result;
use crate::host::ReaderHost;
use crate::reader::Reader;
use crate::service::TerminalService;

/// What [`initialize`] registered
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitSummary {
    /// Indices registered from a terminal descriptor
    pub attached: Vec<u32>,
    /// Indices registered as placeholders
    pub placeholders: Vec<u32>,
    /// Indices the host refused
    pub failed: Vec<u32>,
}

/// Register a reader for every terminal the service reports, plus
/// placeholders for the first `preallocate` indices that have none
///
/// A reader the host refuses is logged and skipped; the remaining readers
/// are still registered.
pub fn initialize<S>(
    service: &S,
    host: &mut dyn ReaderHost<Reader<S::Handle>>,
    config: &DriverConfig,
) -> Result<InitSummary>
where
    S: TerminalService,
{
    let mut summary = InitSummary::default();

    for index in config.scan_range() {
        let info = service.enumerate(index);
        let placeholder = info.is_none();
        if placeholder && (index as usize) >= config.preallocate {
            continue;
        }

        let reader = Reader::new(index, info.as_ref());
        let name = reader.name().to_string();
        match host.register_reader(reader) {
            Ok(pos) => {
                debug!(index, pos, name = %name, placeholder, "Registered reader");
                if placeholder {
                    summary.placeholders.push(index);
                } else {
                    summary.attached.push(index);
                }
            }
            Err(err) => {
                warn!(index, name = %name, %err, "Failed to register reader");
                summary.failed.push(index);
            }
        }
    }

    Ok(summary)
}
