//! Renders a peak-usage snapshot to a flamegraph SVG.
//!
//! The renderer proper (`inferno`) is an external collaborator per spec
//! §6 -- this module only builds the `frame;frame;...;frame bytes` line
//! format it expects and drives it, the same division of labor the engine
//! this crate is modeled on uses.

use crate::callstack::{CallstackId, Frame};
use crate::interner::FunctionInterner;
use anyhow::{Context, Result};
use inferno::flamegraph::{self, Options};
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Everything needed to turn an id-keyed snapshot into human-readable lines:
/// the reverse callstack map and the function-name interner.
pub struct CallstackNames<'a> {
    pub stacks: &'a HashMap<CallstackId, Vec<Frame>>,
    pub functions: &'a FunctionInterner,
}

impl<'a> CallstackNames<'a> {
    fn render(&self, id: CallstackId) -> String {
        let Some(frames) = self.stacks.get(&id) else {
            return "[unknown stack]".to_string();
        };
        if frames.is_empty() {
            return "[No interpreter stack]".to_string();
        }
        frames
            .iter()
            .map(|f| match self.functions.get(f.function_id) {
                Some(loc) => format!("{}:{} ({})", loc.file, f.line, loc.function),
                None => format!("<unknown>:{}", f.line),
            })
            .collect::<Vec<_>>()
            .join(";")
    }
}

/// Write a peak-usage snapshot as a flamegraph SVG plus the raw line-format
/// data it was generated from, both under `output_dir`.
pub fn dump(
    output_dir: &str,
    base_filename: &str,
    title: &str,
    peak_bytes: usize,
    by_callstack: &HashMap<CallstackId, usize>,
    names: &CallstackNames,
) -> Result<PathBuf> {
    let dir = Path::new(output_dir);
    if !dir.exists() {
        fs::create_dir_all(dir)
            .with_context(|| format!("creating output directory {}", dir.display()))?;
    }

    let raw_path = dir.join(format!("{base_filename}.prof"));
    write_lines(&raw_path, by_callstack, names)
        .with_context(|| format!("writing raw profile data to {}", raw_path.display()))?;

    let svg_path = dir.join(format!("{base_filename}.svg"));
    render_svg(&raw_path, &svg_path, title, peak_bytes, false)
        .with_context(|| format!("rendering flamegraph to {}", svg_path.display()))?;
    Ok(svg_path)
}

fn write_lines(
    path: &Path,
    by_callstack: &HashMap<CallstackId, usize>,
    names: &CallstackNames,
) -> Result<()> {
    let mut file = fs::File::create(path)?;
    for (&id, &bytes) in by_callstack {
        if bytes == 0 {
            continue;
        }
        writeln!(file, "{} {}", names.render(id), bytes)?;
    }
    file.flush()?;
    Ok(())
}

fn render_svg(
    raw_path: &Path,
    svg_path: &Path,
    title: &str,
    peak_bytes: usize,
    reversed: bool,
) -> Result<()> {
    let title = format!(
        "{title} ({:.1} MiB)",
        peak_bytes as f64 / (1024.0 * 1024.0)
    );
    let mut options = Options {
        title,
        count_name: "bytes".to_string(),
        font_size: 16,
        font_type: "mono".to_string(),
        frame_height: 22,
        reverse_stack_order: reversed,
        direction: flamegraph::Direction::Inverted,
        ..Default::default()
    };
    let mut out = fs::File::create(svg_path)?;
    flamegraph::from_files(&mut options, &[raw_path.to_path_buf()], &mut out)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    out.flush()?;
    Ok(())
}
