//! Tree-shaped report rendering.
//!
//! Parent/child relations come from path prefixes alone. An ancestor that was
//! never recorded itself gets no row, but its descendants are still placed
//! beneath it, so `pipeline/stage-1` and `pipeline/stage-2` render as
//! connected siblings even without a `pipeline` node. Siblings keep
//! first-seen order.
//!
//! The name column is sized by display width, kept between 15 and 80
//! columns; longer labels are cut and end in `...`.

use std::path::Path;

use serde::Serialize;
use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use crate::error::Error;
use crate::registry::{Registry, Snapshot};
use crate::stats::SectionStats;

const NAME_HEADER: &str = "Function";
const NAME_MIN_WIDTH: usize = 15;
const NAME_MAX_WIDTH: usize = 80;
const ELLIPSIS: &str = "...";
const RUNS_WIDTH: usize = 8;
const MS_WIDTH: usize = 12;
const MS_COLUMNS: [&str; 5] = ["Total(ms)", "Median(ms)", "Avg(ms)", "Min(ms)", "Max(ms)"];

/// One prefix in the section tree; `stats` is `None` for implicit ancestors.
struct TreeNode {
    segment: String,
    stats: Option<SectionStats>,
    children: Vec<usize>,
}

/// Arena-backed prefix tree. Index 0 is a virtual root above all sections.
struct Tree {
    nodes: Vec<TreeNode>,
}

impl Tree {
    fn build(snapshot: &Snapshot) -> Self {
        let mut tree = Tree {
            nodes: vec![TreeNode {
                segment: String::new(),
                stats: None,
                children: Vec::new(),
            }],
        };
        // Snapshot order is first-seen order, so children are appended in the
        // order their earliest descendant was first recorded.
        for stats in snapshot.stats() {
            let mut at = 0;
            for segment in stats.path.segments() {
                at = tree.child(at, segment);
            }
            tree.nodes[at].stats = Some(stats);
        }
        tree
    }

    fn child(&mut self, parent: usize, segment: &str) -> usize {
        let existing = self.nodes[parent]
            .children
            .iter()
            .copied()
            .find(|&c| self.nodes[c].segment == segment);
        if let Some(idx) = existing {
            return idx;
        }
        let idx = self.nodes.len();
        self.nodes.push(TreeNode {
            segment: segment.to_owned(),
            stats: None,
            children: Vec::new(),
        });
        self.nodes[parent].children.push(idx);
        idx
    }

    /// Depth-first rows as `(label, stats)`, labels carrying tree connectors.
    fn rows(&self) -> Vec<(String, &SectionStats)> {
        let mut rows = Vec::new();
        for &root in &self.nodes[0].children {
            self.walk(root, None, &mut rows);
        }
        rows
    }

    /// `prefix` is `None` for top-level sections, otherwise the continuation
    /// columns inherited from ancestors plus whether this node is a last child.
    fn walk<'a>(
        &'a self,
        idx: usize,
        prefix: Option<(&str, bool)>,
        rows: &mut Vec<(String, &'a SectionStats)>,
    ) {
        let node = &self.nodes[idx];
        let (label, inherited) = match prefix {
            None => (node.segment.clone(), String::new()),
            Some((lead, last)) => {
                let connector = if last { "└─ " } else { "├─ " };
                let carry = if last { "   " } else { "│  " };
                (
                    format!("{lead}{connector}{}", node.segment),
                    format!("{lead}{carry}"),
                )
            }
        };
        if let Some(stats) = &node.stats {
            rows.push((label, stats));
        }
        let count = node.children.len();
        for (i, &child) in node.children.iter().enumerate() {
            self.walk(child, Some((inherited.as_str(), i + 1 == count)), rows);
        }
    }
}

/// Cut `label` to at most `width` display columns.
fn fit_label(label: &str, width: usize) -> String {
    if label.width() <= width {
        return label.to_owned();
    }
    let budget = width.saturating_sub(ELLIPSIS.len());
    let mut used = 0;
    let mut out = String::new();
    for c in label.chars() {
        let w = c.width().unwrap_or(0);
        if used + w > budget {
            break;
        }
        used += w;
        out.push(c);
    }
    out.push_str(ELLIPSIS);
    out
}

/// Left-align `cell` in `width` display columns.
fn pad_right(cell: &str, width: usize) -> String {
    let fill = width.saturating_sub(cell.width());
    format!("{cell}{}", " ".repeat(fill))
}

/// Statistics for every recorded path, in the order the table lists them.
pub fn tree_stats(snapshot: &Snapshot) -> Vec<SectionStats> {
    let tree = Tree::build(snapshot);
    tree.rows().into_iter().map(|(_, s)| s.clone()).collect()
}

/// Render the snapshot as a box-drawn table.
///
/// An empty snapshot renders the header and rules with no data rows.
pub fn format_table(snapshot: &Snapshot) -> String {
    let tree = Tree::build(snapshot);
    let rows = tree.rows();

    let name_width = rows
        .iter()
        .map(|(label, _)| label.width())
        .max()
        .unwrap_or(0)
        .clamp(NAME_MIN_WIDTH.max(NAME_HEADER.len()), NAME_MAX_WIDTH);
    let total_width = name_width + 2 + RUNS_WIDTH + MS_COLUMNS.len() * (2 + MS_WIDTH);
    let rule = "-".repeat(total_width);

    let mut out = String::new();
    out.push_str(&rule);
    out.push('\n');
    out.push_str(&format!(
        "{}  {:>RUNS_WIDTH$}",
        pad_right(NAME_HEADER, name_width),
        "Runs"
    ));
    for header in MS_COLUMNS {
        out.push_str(&format!("  {header:>MS_WIDTH$}"));
    }
    out.push('\n');
    out.push_str(&rule);
    out.push('\n');

    for (label, s) in &rows {
        let name = pad_right(&fit_label(label, name_width), name_width);
        out.push_str(&format!("{name}  {:>RUNS_WIDTH$}", s.runs));
        for value in [s.total_ms, s.median_ms, s.avg_ms, s.min_ms, s.max_ms] {
            out.push_str(&format!("  {value:>MS_WIDTH$.1}"));
        }
        out.push('\n');
    }
    out.push_str(&rule);
    out.push('\n');
    out
}

#[derive(Serialize)]
struct JsonReport<'a> {
    sections: &'a [SectionStats],
}

/// Serialize the snapshot as `{"sections": [...]}` in table order.
pub fn to_json(snapshot: &Snapshot) -> Result<String, Error> {
    let sections = tree_stats(snapshot);
    Ok(serde_json::to_string_pretty(&JsonReport {
        sections: &sections,
    })?)
}

/// Write the JSON report to `path`, creating parent directories as needed.
pub fn write_json(snapshot: &Snapshot, path: &Path) -> Result<(), Error> {
    let json = to_json(snapshot)?;
    let write_err = |source: std::io::Error| Error::ReportWrite {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(write_err)?;
    }
    std::fs::write(path, json).map_err(write_err)
}

impl Registry {
    pub fn get_table_str(&self) -> String {
        format_table(&self.snapshot())
    }

    pub fn print_table(&self) {
        anstream::print!("{}", self.get_table_str());
    }

    /// Per-path statistics in table order.
    pub fn report(&self) -> Vec<SectionStats> {
        tree_stats(&self.snapshot())
    }

    pub fn to_json(&self) -> Result<String, Error> {
        to_json(&self.snapshot())
    }

    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        write_json(&self.snapshot(), path.as_ref())
    }
}
