//! Generate testdata command implementation.

use anyhow::{Context, Result};
use netrate::testdata::generate_test_data;
use std::fs;
use std::path::PathBuf;
use tracing::debug;

/// Writes a synthetic traffic fixture usable with `--test-data-file`.
pub fn command_generate_testdata(output: PathBuf, processes: usize, samples: usize) -> Result<()> {
    debug!(
        "Generating test data: processes={}, samples={}, output={}",
        processes,
        samples,
        output.display()
    );

    let mut rng = rand::thread_rng();
    let test_data = generate_test_data(&mut rng, processes, samples.max(2));

    let json_content = serde_json::to_string_pretty(&test_data)?;
    fs::write(&output, &json_content)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    println!(
        "✅ Generated test data: {} processes, {} samples in {}",
        test_data.processes.len(),
        test_data.sample_count(),
        output.display()
    );

    Ok(())
}
