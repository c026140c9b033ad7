//! Hierarchical call timing.
//!
//! Mark sections of code with [`scope`], [`timed`] or the
//! [`begin_section`] / [`end_section`] pair. Nested sections build a path
//! (`pipeline/stage-1/stage-2`), repeated sections with the same path
//! aggregate, and [`print_table`] renders the result as a tree:
//!
//! ```
//! let total = timetap::timed("compute-sum", || (0..1_000u64).sum::<u64>())?;
//! {
//!     let _pipeline = timetap::scope("pipeline")?;
//!     let _stage = timetap::scope("stage-1")?;
//! }
//! assert!(timetap::get_table_str().contains("stage-1"));
//! # let _ = total;
//! # Ok::<(), timetap::Error>(())
//! ```
//!
//! The free functions act on one process-wide [`Registry`], created from the
//! environment on first use (see [`Config::from_env`]) or supplied up front
//! with [`install`]. Each thread nests its own sections; threads recording the
//! same path share one node.

mod config;
mod device;
mod error;
mod path;
mod registry;
mod report;
mod stats;
mod tracker;

use std::path::Path;
use std::sync::OnceLock;

pub use config::{Config, ENV_ENABLED, ENV_MAX_SAMPLES};
pub use device::{DeviceSync, NoDevice};
pub use error::Error;
pub use path::SectionPath;
pub use registry::{NodeSnapshot, Registry, Snapshot};
pub use report::{format_table, tree_stats};
pub use stats::{SectionStats, median};
pub use tracker::{Guard, Section, SectionOptions, current_path, open_depth};

static REGISTRY: OnceLock<Registry> = OnceLock::new();

/// The process-wide registry, created from the environment on first use.
///
/// A malformed environment falls back to `Config::default()` with a warning.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let config = Config::from_env().unwrap_or_else(|e| {
            log::warn!("timetap: {e}; using defaults");
            Config::default()
        });
        Registry::new(config)
    })
}

/// Make `registry` the process-wide registry.
///
/// Must run before anything touches the global registry; afterwards it fails
/// with `Error::Configuration` and leaves the existing registry in place.
pub fn install(registry: Registry) -> Result<&'static Registry, Error> {
    let mut slot = Some(registry);
    let installed = REGISTRY.get_or_init(|| slot.take().unwrap_or_default());
    match slot {
        None => Ok(installed),
        Some(_) => Err(Error::Configuration(
            "timetap registry already initialized; call install() before first use".into(),
        )),
    }
}

pub fn begin_section(name: &str) -> Result<Section, Error> {
    registry().begin_section(name)
}

pub fn begin_section_with(name: &str, options: SectionOptions) -> Result<Section, Error> {
    registry().begin_section_with(name, options)
}

pub fn end_section(section: Section) -> Result<(), Error> {
    registry().end_section(section)
}

/// Time the enclosing block: the section ends when the guard drops.
pub fn scope(name: &str) -> Result<Guard<'static>, Error> {
    registry().scope(name)
}

pub fn scope_with(name: &str, options: SectionOptions) -> Result<Guard<'static>, Error> {
    registry().scope_with(name, options)
}

/// Time one call of `f`.
pub fn timed<T>(name: &str, f: impl FnOnce() -> T) -> Result<T, Error> {
    registry().timed(name, f)
}

pub fn timed_with<T>(
    name: &str,
    options: SectionOptions,
    f: impl FnOnce() -> T,
) -> Result<T, Error> {
    registry().timed_with(name, options, f)
}

pub fn get_table_str() -> String {
    registry().get_table_str()
}

/// Write the report table to stdout.
pub fn print_table() {
    registry().print_table();
}

pub fn report() -> Vec<SectionStats> {
    registry().report()
}

pub fn snapshot() -> Snapshot {
    registry().snapshot()
}

pub fn to_json() -> Result<String, Error> {
    registry().to_json()
}

pub fn write_json(path: impl AsRef<Path>) -> Result<(), Error> {
    registry().write_json(path)
}

/// Discard all recorded sections. Open sections keep running.
pub fn reset() {
    registry().reset();
}

pub fn enable() {
    registry().enable();
}

pub fn disable() {
    registry().disable();
}

pub fn is_enabled() -> bool {
    registry().is_enabled()
}
