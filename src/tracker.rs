//! Thread-local section nesting with RAII guards.
//!
//! `begin_section(name)` pushes a `Frame` onto the calling thread's stack and
//! returns a `Section` handle carrying the full path and the start instant.
//! `end_section(handle)` pops the frame, reads the clock and hands the
//! `(path, elapsed)` pair to the `Registry`. Whether the sample is kept is
//! decided by the collection flag at that moment, so a section spanning a
//! `disable()` / `enable()` toggle records once or not at all, never partially.
//!
//! Each thread nests independently; identical paths from different threads
//! aggregate into the same node.
//!
//! Per-section behavior is set with `SectionOptions`: a section can be
//! switched off on its own (it still nests its children), synchronize device
//! work before stopping the clock, or print its timing as it ends.
//!
//! Handles are `Send`. A handle ended on another thread records its wall time
//! and marks its frame closed; the origin thread drops closed frames the next
//! time it touches its stack.

use std::cell::RefCell;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::Error;
use crate::path::{SectionPath, is_blank};
use crate::registry::Registry;

/// Entry on the thread-local section stack.
struct Frame {
    path: SectionPath,
    /// Shared with the `Section` handle. Set when the handle is ended off-thread
    /// or discarded by an unbalanced exit.
    closed: Arc<AtomicBool>,
}

impl Frame {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Pop closed frames off the top of the stack.
fn drain_closed(stack: &mut Vec<Frame>) {
    while stack.last().is_some_and(Frame::is_closed) {
        if let Some(frame) = stack.pop() {
            log::debug!("timetap: dropping closed frame {}", frame.path);
        }
    }
}

/// How a single section is timed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionOptions {
    /// Synchronize device work before the clock stops.
    pub device: bool,
    /// Print `outer -> inner 0.1234 s` to stdout when the section is recorded.
    pub verbose: bool,
    /// When false the section is tracked for nesting but never recorded.
    pub enabled: bool,
}

impl Default for SectionOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl SectionOptions {
    pub const fn new() -> Self {
        Self {
            device: false,
            verbose: false,
            enabled: true,
        }
    }

    pub const fn with_device(mut self, device: bool) -> Self {
        self.device = device;
        self
    }

    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub const fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }
}

/// An open section. Consumed by `end_section`.
#[must_use = "an unended section is never recorded; pass it to `end_section` or use `scope()`"]
#[derive(Debug)]
pub struct Section {
    path: SectionPath,
    start: Instant,
    options: SectionOptions,
    thread: ThreadId,
    closed: Arc<AtomicBool>,
}

impl Section {
    pub fn path(&self) -> &SectionPath {
        &self.path
    }

    pub fn name(&self) -> &str {
        self.path.leaf()
    }

    pub fn options(&self) -> SectionOptions {
        self.options
    }
}

// Handles may be ended on another thread; keep them Send.
const _: () = {
    fn _assert_send<T: Send>() {}
    fn _check() {
        _assert_send::<Section>();
    }
};

fn enter(name: &str, options: SectionOptions) -> Result<Section, Error> {
    if is_blank(name) {
        return Err(Error::Configuration(format!(
            "section name must not be empty or whitespace (got {name:?})"
        )));
    }
    let closed = Arc::new(AtomicBool::new(false));
    let path = STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        drain_closed(&mut stack);
        let path = match stack.last() {
            Some(parent) => parent.path.child(name),
            None => SectionPath::new([name]),
        };
        stack.push(Frame {
            path: path.clone(),
            closed: Arc::clone(&closed),
        });
        path
    });
    Ok(Section {
        path,
        start: Instant::now(),
        options,
        thread: thread::current().id(),
        closed,
    })
}

/// Remove `section`'s frame from the calling thread's stack.
///
/// Well-nested exits pop the top frame. If the section's frame is buried under
/// frames that are still open, it is removed together with everything above
/// it and the exit is rejected; the stack is left holding only frames that
/// were opened before it. A section whose frame is already gone leaves the
/// stack untouched.
fn pop_frame(section: &Section) -> Result<(), Error> {
    STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        drain_closed(&mut stack);

        let top = stack.last().map(|f| f.path.leaf().to_owned());
        let position = stack
            .iter()
            .rposition(|f| Arc::ptr_eq(&f.closed, &section.closed));

        match position {
            Some(i) if i + 1 == stack.len() => {
                stack.pop();
                Ok(())
            }
            Some(i) => {
                for frame in stack.drain(i..) {
                    frame.closed.store(true, Ordering::Release);
                }
                Err(Error::UnbalancedScope {
                    expected: section.name().to_owned(),
                    found: top,
                })
            }
            None => Err(Error::UnbalancedScope {
                expected: section.name().to_owned(),
                found: top,
            }),
        }
    })
}

impl Registry {
    /// Open a section nested under whatever section is open on this thread.
    ///
    /// Fails with `Error::Configuration` for an empty or whitespace-only name,
    /// before any state changes.
    pub fn begin_section(&self, name: &str) -> Result<Section, Error> {
        enter(name, SectionOptions::new())
    }

    pub fn begin_section_with(
        &self,
        name: &str,
        options: SectionOptions,
    ) -> Result<Section, Error> {
        enter(name, options)
    }

    /// Close a section and record its elapsed time if both the section and
    /// collection are enabled.
    pub fn end_section(&self, section: Section) -> Result<(), Error> {
        let options = section.options;
        let recording = options.enabled && self.is_enabled();
        if options.device && recording {
            self.synchronize_device();
        }
        let elapsed = section.start.elapsed();

        if thread::current().id() == section.thread {
            pop_frame(&section)?;
        } else {
            // Ended off-thread: the origin stack is unreachable from here.
            section.closed.store(true, Ordering::Release);
        }

        if recording && self.record(&section.path, elapsed)? && options.verbose {
            anstream::println!("{}", verbose_line(&section.path, elapsed));
        }
        Ok(())
    }

    /// Scoped adapter: the returned guard ends the section when dropped.
    pub fn scope(&self, name: &str) -> Result<Guard<'_>, Error> {
        self.scope_with(name, SectionOptions::new())
    }

    pub fn scope_with(&self, name: &str, options: SectionOptions) -> Result<Guard<'_>, Error> {
        Ok(Guard::new(self, self.begin_section_with(name, options)?))
    }

    /// Wrapping adapter: time one call of `f` as section `name`.
    ///
    /// The closure's output is returned as is. If `f` panics, the section is
    /// still ended and recorded while the panic unwinds. Only an invalid name
    /// is an error; a failure to end the section is logged and the output is
    /// still returned.
    pub fn timed<T>(&self, name: &str, f: impl FnOnce() -> T) -> Result<T, Error> {
        self.timed_with(name, SectionOptions::new(), f)
    }

    pub fn timed_with<T>(
        &self,
        name: &str,
        options: SectionOptions,
        f: impl FnOnce() -> T,
    ) -> Result<T, Error> {
        let guard = self.scope_with(name, options)?;
        let out = f();
        drop(guard);
        Ok(out)
    }
}

fn verbose_line(path: &SectionPath, elapsed: Duration) -> String {
    format!(
        "{} {:.4} s",
        path.segments().join(" -> "),
        elapsed.as_secs_f64()
    )
}

/// RAII section guard. Ends its section on drop, on every exit path.
///
/// Errors from a drop-time end are logged; call `finish()` to observe them.
#[must_use = "dropping the guard immediately records ~0ms; bind it with `let _guard = ...`"]
#[derive(Debug)]
pub struct Guard<'r> {
    registry: &'r Registry,
    section: Option<Section>,
}

impl<'r> Guard<'r> {
    pub(crate) fn new(registry: &'r Registry, section: Section) -> Self {
        Self {
            registry,
            section: Some(section),
        }
    }

    pub fn path(&self) -> Option<&SectionPath> {
        self.section.as_ref().map(Section::path)
    }

    /// End the section now and report unbalanced usage to the caller.
    pub fn finish(mut self) -> Result<(), Error> {
        match self.section.take() {
            Some(section) => self.registry.end_section(section),
            None => Ok(()),
        }
    }
}

impl Drop for Guard<'_> {
    fn drop(&mut self) {
        if let Some(section) = self.section.take()
            && let Err(e) = self.registry.end_section(section)
        {
            log::error!("timetap: {e}");
        }
    }
}

/// Number of sections currently open on the calling thread.
pub fn open_depth() -> usize {
    STACK.with(|stack| stack.borrow().iter().filter(|f| !f.is_closed()).count())
}

/// Path of the innermost open section on the calling thread.
pub fn current_path() -> Option<SectionPath> {
    STACK.with(|stack| {
        stack
            .borrow()
            .iter()
            .rev()
            .find(|f| !f.is_closed())
            .map(|f| f.path.clone())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::device::DeviceSync;
    use std::panic::{AssertUnwindSafe, catch_unwind};
    use std::sync::atomic::AtomicUsize;

    fn path(segments: &[&str]) -> SectionPath {
        SectionPath::new(segments.iter().copied())
    }

    fn runs(registry: &Registry, segments: &[&str]) -> Option<u64> {
        registry.snapshot().get(&path(segments)).map(|n| n.runs)
    }

    #[test]
    fn nested_sections_build_paths() {
        let registry = Registry::default();
        {
            let _pipeline = registry.scope("pipeline").unwrap();
            for _ in 0..2 {
                let stage = registry.scope("stage-1").unwrap();
                assert_eq!(stage.path(), Some(&path(&["pipeline", "stage-1"])));
                let _inner = registry.scope("stage-2").unwrap();
                assert_eq!(open_depth(), 3);
            }
        }
        assert_eq!(open_depth(), 0);
        assert_eq!(runs(&registry, &["pipeline"]), Some(1));
        assert_eq!(runs(&registry, &["pipeline", "stage-1"]), Some(2));
        assert_eq!(runs(&registry, &["pipeline", "stage-1", "stage-2"]), Some(2));
        assert_eq!(runs(&registry, &["stage-1"]), None);
    }

    #[test]
    fn blank_names_are_rejected_without_touching_the_stack() {
        let registry = Registry::default();
        for name in ["", "   ", "\t\n"] {
            let err = registry.begin_section(name).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "got {err:?}");
        }
        assert_eq!(open_depth(), 0);
        assert!(registry.timed(" ", || ()).is_err());
        assert!(registry.snapshot().is_empty());
    }

    #[test]
    fn elapsed_time_covers_the_section_body() {
        let registry = Registry::default();
        let section = registry.begin_section("sleepy").unwrap();
        thread::sleep(Duration::from_millis(20));
        registry.end_section(section).unwrap();
        let snap = registry.snapshot();
        let node = snap.get(&path(&["sleepy"])).unwrap();
        assert!(node.total >= Duration::from_millis(20), "{:?}", node.total);
    }

    #[test]
    fn unbalanced_exit_is_reported_and_stack_stays_consistent() {
        let registry = Registry::default();
        let outer = registry.begin_section("outer").unwrap();
        let a = registry.begin_section("A").unwrap();
        let b = registry.begin_section("B").unwrap();

        let err = registry.end_section(a).unwrap_err();
        match err {
            Error::UnbalancedScope { expected, found } => {
                assert_eq!(expected, "A");
                assert_eq!(found.as_deref(), Some("B"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // A and everything above it is gone; outer is still open.
        assert_eq!(current_path(), Some(path(&["outer"])));

        // B's frame went with A; ending it leaves the stack alone.
        assert!(registry.end_section(b).is_err());
        assert_eq!(open_depth(), 1);

        registry.end_section(outer).unwrap();
        assert_eq!(open_depth(), 0);
        assert_eq!(runs(&registry, &["outer"]), Some(1));
        assert_eq!(runs(&registry, &["outer", "A"]), None);
        assert_eq!(runs(&registry, &["outer", "A", "B"]), None);
    }

    #[test]
    fn ending_on_an_empty_stack_reports_empty() {
        let registry = Registry::default();
        let section = registry.begin_section("lonely").unwrap();
        // Drain the frame out from under the handle.
        STACK.with(|s| s.borrow_mut().clear());
        match registry.end_section(section) {
            Err(Error::UnbalancedScope { found: None, .. }) => {}
            other => panic!("expected empty-stack error, got {other:?}"),
        }
    }

    #[test]
    fn guard_records_when_the_body_panics() {
        let registry = Registry::default();
        let result = catch_unwind(AssertUnwindSafe(|| {
            registry.timed("explodes", || -> u32 { panic!("boom") })
        }));
        assert!(result.is_err(), "panic should propagate");
        assert_eq!(runs(&registry, &["explodes"]), Some(1));
        assert_eq!(open_depth(), 0);
    }

    #[test]
    fn timed_passes_user_errors_through_unchanged() {
        let registry = Registry::default();
        let out: Result<Result<u8, String>, Error> =
            registry.timed("fallible", || Err("user failure".to_owned()));
        assert_eq!(out.unwrap(), Err("user failure".to_owned()));
        assert_eq!(runs(&registry, &["fallible"]), Some(1));
    }

    #[test]
    fn timed_keeps_the_user_value_when_nesting_breaks() {
        let registry = Registry::default();
        let out = registry.timed("outer", || -> Result<(), &str> {
            // Never ended, so "outer" is no longer on top when it exits.
            let _leaked = registry.begin_section("inner").unwrap();
            Err("user failure")
        });
        assert_eq!(out.unwrap(), Err("user failure"));
        assert_eq!(open_depth(), 0);
        assert_eq!(runs(&registry, &["outer"]), None);
    }

    #[test]
    fn switched_off_section_still_nests_its_children() {
        let registry = Registry::default();
        let off = SectionOptions::new().with_enabled(false);
        {
            let outer = registry.scope_with("outer", off).unwrap();
            assert_eq!(outer.path(), Some(&path(&["outer"])));
            registry.timed("inner", || ()).unwrap();
            registry.timed_with("quiet", off, || ()).unwrap();
        }
        assert_eq!(open_depth(), 0);
        assert_eq!(runs(&registry, &["outer"]), None);
        assert_eq!(runs(&registry, &["outer", "quiet"]), None);
        assert_eq!(runs(&registry, &["outer", "inner"]), Some(1));
    }

    #[test]
    fn verbose_sections_record_and_format_the_path() {
        let registry = Registry::default();
        let verbose = SectionOptions::new().with_verbose(true);
        {
            let _a = registry.scope("A").unwrap();
            registry.timed_with("B", verbose, || ()).unwrap();
        }
        assert_eq!(runs(&registry, &["A", "B"]), Some(1));
        assert_eq!(
            verbose_line(&path(&["A", "B"]), Duration::from_micros(123_400)),
            "A -> B 0.1234 s"
        );
    }

    #[test]
    fn flag_is_read_at_exit() {
        let registry = Registry::new(Config::default().with_enabled(false));
        let outer = registry.begin_section("window").unwrap();
        {
            let _quiet = registry.scope("quiet").unwrap();
        }
        registry.enable();
        {
            let _loud = registry.scope("loud").unwrap();
        }
        registry.end_section(outer).unwrap();

        assert_eq!(runs(&registry, &["window", "quiet"]), None);
        assert_eq!(runs(&registry, &["window", "loud"]), Some(1));
        assert_eq!(runs(&registry, &["window"]), Some(1));

        let started_enabled = registry.begin_section("late").unwrap();
        registry.disable();
        registry.end_section(started_enabled).unwrap();
        assert_eq!(runs(&registry, &["late"]), None);
        assert_eq!(open_depth(), 0);
    }

    #[test]
    fn reset_keeps_open_sections_recording() {
        let registry = Registry::default();
        let outer = registry.begin_section("survivor").unwrap();
        {
            let _g = registry.scope("before").unwrap();
        }
        registry.reset();
        registry.end_section(outer).unwrap();
        let snap = registry.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.nodes()[0].path, path(&["survivor"]));
    }

    #[test]
    fn section_ended_on_another_thread_still_records() {
        let registry = Registry::default();
        let outer = registry.begin_section("host").unwrap();
        let migrating = registry.begin_section("migrating").unwrap();
        thread::scope(|s| {
            s.spawn(|| registry.end_section(migrating).unwrap());
        });
        // The closed frame is skipped when nesting new sections.
        {
            let next = registry.scope("next").unwrap();
            assert_eq!(next.path(), Some(&path(&["host", "next"])));
        }
        registry.end_section(outer).unwrap();
        assert_eq!(open_depth(), 0);
        assert_eq!(runs(&registry, &["host", "migrating"]), Some(1));
        assert_eq!(runs(&registry, &["host", "next"]), Some(1));
        assert_eq!(runs(&registry, &["host"]), Some(1));
    }

    struct CountingSync(AtomicUsize);

    impl DeviceSync for CountingSync {
        fn synchronize(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn device_sections_synchronize_before_the_clock_stops() {
        let sync = Arc::new(CountingSync(AtomicUsize::new(0)));
        let registry = Registry::with_device_sync(Config::default(), sync.clone());

        let device = SectionOptions::new().with_device(true);
        registry.timed_with("forward-pass", device, || ()).unwrap();
        registry.timed("host-only", || ()).unwrap();
        assert_eq!(sync.0.load(Ordering::SeqCst), 1);

        registry
            .timed_with("skipped", device.with_enabled(false), || ())
            .unwrap();
        assert_eq!(sync.0.load(Ordering::SeqCst), 1, "no sync for a switched-off section");

        registry.disable();
        registry.timed_with("forward-pass", device, || ()).unwrap();
        assert_eq!(sync.0.load(Ordering::SeqCst), 1, "no sync while disabled");
        assert_eq!(runs(&registry, &["forward-pass"]), Some(1));
    }

    #[test]
    fn device_sections_without_a_device_time_the_host() {
        let registry = Registry::default();
        let options = SectionOptions::new().with_device(true);
        let section = registry.begin_section_with("gpu", options).unwrap();
        assert!(section.options().device);
        registry.end_section(section).unwrap();
        assert!(!registry.device_sync().is_available());
        assert_eq!(runs(&registry, &["gpu"]), Some(1));
    }
}
