//! Helper functions for tempfile usage in tests

use std::io::Write;

use anyhow::Context;
use tensorplan::Graph;

/// Create a named temp file with a helpful error message.
pub fn create_temp_file_with_suffix(suffix: &str) -> anyhow::Result<tempfile::NamedTempFile> {
    tempfile::NamedTempFile::with_suffix(suffix)
        .context("Failed to create temporary file with suffix")
}

/// Serialize `graph` into a fresh `.json` temp file.
pub fn write_graph_file(graph: &Graph) -> anyhow::Result<tempfile::NamedTempFile> {
    let mut file = create_temp_file_with_suffix(".json")?;
    file.write_all(graph.to_json()?.as_bytes())
        .context("Failed to write graph to temp file")?;
    file.flush()?;
    Ok(file)
}
