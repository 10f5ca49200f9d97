//! ARG to DOT (Graphviz) conversion.
//!
//! The generated DOT output follows these conventions:
//! - **Nodes** are labeled with their id, location and abstract state
//! - **Root node** is rendered at the top (source rank)
//! - **Target nodes** are filled with the target color
//! - **Covered nodes** are dashed, with a dotted edge to each covering node
//! - **Edges** are labeled with the effect of the CFA edge they were computed along
//!
//! # Examples
//!
//! ```
//! use cpa_rs::arg::Arg;
//! use cpa_rs::cfa::{EdgeId, LocationId};
//!
//! let mut arg = Arg::new();
//! let root = arg.add_root("x = 0", LocationId::new(0));
//! arg.add_child(root, EdgeId::new(0), "x = 1", LocationId::new(1));
//!
//! let dot = arg.to_dot().unwrap();
//! // Write to file and render with: dot -Tpng output.dot -o output.png
//! assert!(dot.starts_with("digraph {"));
//! ```

use std::fmt::Debug;

use crate::arg::Arg;

/// Configuration options for DOT output generation.
#[derive(Debug, Clone)]
pub struct DotConfig {
    /// Shape for ARG nodes (default: "box")
    pub node_shape: &'static str,
    /// Fill color for target nodes (default: "red")
    pub target_color: &'static str,
    /// Style for covered nodes (default: "dashed")
    pub covered_style: &'static str,
    /// Style for coverage edges (default: "dotted")
    pub coverage_edge_style: &'static str,
    /// Whether to include abstract states in node labels (default: true)
    pub show_states: bool,
}

impl Default for DotConfig {
    fn default() -> Self {
        Self {
            node_shape: "box",
            target_color: "red",
            covered_style: "dashed",
            coverage_edge_style: "dotted",
            show_states: true,
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

impl<S: Debug> Arg<S> {
    /// Converts the ARG to DOT format, labeling states with their `Debug` output.
    pub fn to_dot(&self) -> Result<String, std::fmt::Error> {
        self.to_dot_with_config(&DotConfig::default())
    }

    /// Converts the ARG to DOT format with custom configuration.
    pub fn to_dot_with_config(&self, config: &DotConfig) -> Result<String, std::fmt::Error> {
        self.to_dot_with_labels(config, |s| format!("{:?}", s))
    }
}

impl<S> Arg<S> {
    /// Converts the ARG to DOT format, rendering states with `label`.
    pub fn to_dot_with_labels(&self, config: &DotConfig, label: impl Fn(&S) -> String) -> Result<String, std::fmt::Error> {
        use std::fmt::Write as _;

        let mut dot = String::new();
        writeln!(dot, "digraph {{")?;
        writeln!(dot, "node [shape={}];", config.node_shape)?;

        if let Some(root) = self.root() {
            writeln!(dot, "{{ rank=source; {}; }}", root.index())?;
        }

        for node in self.nodes() {
            let mut text = format!("{} @ {}", node.id(), node.location());
            if config.show_states {
                text.push_str("\\n");
                text.push_str(&escape(&label(node.state())));
            }
            let mut attrs = format!("label=\"{}\"", text);
            if node.is_target() {
                write!(attrs, ", style=filled, fillcolor={}", config.target_color)?;
            } else if node.is_covered() {
                write!(attrs, ", style={}", config.covered_style)?;
            }
            writeln!(dot, "{} [{}];", node.id().index(), attrs)?;
        }

        for node in self.nodes() {
            for &(parent, edge) in node.parents() {
                writeln!(dot, "{} -> {} [label=\"{}\"];", parent.index(), node.id().index(), edge)?;
            }
            for &coverer in node.covered_by() {
                writeln!(
                    dot,
                    "{} -> {} [style={}, constraint=false];",
                    node.id().index(),
                    coverer.index(),
                    config.coverage_edge_style
                )?;
            }
        }

        writeln!(dot, "}}")?;
        Ok(dot)
    }
}
