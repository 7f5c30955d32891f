//! Hierarchical section profiler.
//!
//! Sections nest by begin/end pairing; `mark` starts a new named time slice
//! and rolls accumulated time into the previous one, so per-phase costs can
//! be reported separately. Root-flagged sections always record at the top
//! level regardless of nesting; fine-flagged sections are collected but
//! only rendered when fine output is requested.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};

/// Accumulated numbers for one section path.
#[derive(Debug, Clone, Default)]
pub struct Section {
    /// Total time across all begin/end pairs.
    pub total: Duration,
    /// Time per phase slice.
    pub slices: BTreeMap<String, Duration>,
    /// Number of begin/end pairs.
    pub count: u64,
    /// Flag whether this section is only rendered on request.
    pub fine: bool,
    started: Option<Instant>,
}

/// Hierarchical section timer.
#[derive(Debug, Default)]
pub struct Profiler {
    sections: BTreeMap<String, Section>,
    stack: Vec<String>,
    phase: String,
}

impl Profiler {
    /// Section path separator.
    const SEPARATOR: &'static str = ".";

    /// Fresh profiler in the unnamed phase.
    pub fn new() -> Self {
        Self::default()
    }

    fn path_for(&self, name: &str, root: bool) -> String {
        match self.stack.last() {
            Some(parent) if !root => format!("{parent}{}{name}", Self::SEPARATOR),
            _ => name.to_string(),
        }
    }

    fn begin_at(&mut self, name: &str, root: bool, fine: bool) {
        let path = self.path_for(name, root);
        let section = self.sections.entry(path.clone()).or_default();
        section.fine = fine;
        section.started = Some(Instant::now());
        self.stack.push(path);
    }

    /// Open a nested section.
    pub fn begin(&mut self, name: &str) {
        self.begin_at(name, false, false);
    }

    /// Open a section that records at the root regardless of nesting.
    pub fn begin_root(&mut self, name: &str) {
        self.begin_at(name, true, false);
    }

    /// Open a fine-grained section, rendered only on request.
    pub fn begin_fine(&mut self, name: &str) {
        self.begin_at(name, false, true);
    }

    /// Close the innermost open section.
    pub fn end(&mut self) {
        let Some(path) = self.stack.pop() else { return };
        // root sections push their bare name, which is also their path
        if let Some(section) = self.sections.get_mut(&path) {
            if let Some(started) = section.started.take() {
                let elapsed = started.elapsed();
                section.total += elapsed;
                section.count += 1;
                *section
                    .slices
                    .entry(self.phase.clone())
                    .or_default() += elapsed;
            }
        }
    }

    /// Start a new time slice; running sections roll their accumulated time
    /// into the slice that just ended.
    pub fn mark(&mut self, phase: &str) {
        let now = Instant::now();
        let old_phase = std::mem::replace(&mut self.phase, phase.to_string());
        for section in self.sections.values_mut() {
            if let Some(started) = section.started.as_mut() {
                let elapsed = started.elapsed();
                section.total += elapsed;
                *section.slices.entry(old_phase.clone()).or_default() += elapsed;
                *started = now;
            }
        }
    }

    /// Numbers for one section path.
    pub fn section(&self, path: &str) -> Option<&Section> {
        self.sections.get(path)
    }

    /// Fold another profiler's numbers into this one, for global reports.
    pub fn merge(&mut self, other: &Profiler) {
        for (path, section) in &other.sections {
            let into = self.sections.entry(path.clone()).or_default();
            into.total += section.total;
            into.count += section.count;
            into.fine |= section.fine;
            for (phase, duration) in &section.slices {
                *into.slices.entry(phase.clone()).or_default() += *duration;
            }
        }
    }

    /// Render the report, optionally including fine sections.
    pub fn report(&self, include_fine: bool) -> String {
        let mut out = String::new();
        for (path, section) in &self.sections {
            if section.fine && !include_fine {
                continue;
            }
            out.push_str(&format!(
                "{path}: {:?} over {} calls",
                section.total, section.count
            ));
            for (phase, duration) in &section.slices {
                let label = if phase.is_empty() { "<start>" } else { phase };
                out.push_str(&format!(" [{label}: {duration:?}]"));
            }
            out.push('\n');
        }
        out
    }
}

impl fmt::Display for Profiler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.report(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sections_nest_by_path() {
        let mut profiler = Profiler::new();
        profiler.begin("transform");
        profiler.begin("apply");
        profiler.end();
        profiler.end();

        assert_eq!(profiler.section("transform").unwrap().count, 1);
        assert_eq!(profiler.section("transform.apply").unwrap().count, 1);
        assert!(profiler.section("apply").is_none());
    }

    #[test]
    fn root_sections_ignore_nesting() {
        let mut profiler = Profiler::new();
        profiler.begin("transform");
        profiler.begin_root("audit");
        profiler.end();
        profiler.end();
        assert!(profiler.section("audit").is_some());
        assert!(profiler.section("transform.audit").is_none());
    }

    #[test]
    fn fine_sections_render_on_request() {
        let mut profiler = Profiler::new();
        profiler.begin_fine("points");
        profiler.end();
        assert!(!profiler.report(false).contains("points"));
        assert!(profiler.report(true).contains("points"));
    }

    #[test]
    fn mark_rolls_running_sections() {
        let mut profiler = Profiler::new();
        profiler.begin("transform");
        profiler.mark("default");
        profiler.end();

        let section = profiler.section("transform").unwrap();
        assert_eq!(section.count, 1);
        // one slice from before the mark, one from after
        assert!(section.slices.contains_key(""));
        assert!(section.slices.contains_key("default"));
    }

    #[test]
    fn merge_sums_counts() {
        let mut a = Profiler::new();
        a.begin("transform");
        a.end();
        let mut b = Profiler::new();
        b.begin("transform");
        b.end();
        a.merge(&b);
        assert_eq!(a.section("transform").unwrap().count, 2);
    }
}
