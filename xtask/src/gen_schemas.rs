//! JSON schema generation for the `schema` crate

use anyhow::{Context, Result};
use schema::{LaunchSpec, ProcessExit};
use schemars::{schema::RootSchema, schema_for};
use std::fs;
use std::path::{Path, PathBuf};

pub fn run(out_dir: Option<PathBuf>) -> Result<()> {
    let out_dir = out_dir.unwrap_or_else(default_out_dir);
    fs::create_dir_all(&out_dir)
        .with_context(|| format!("creating {}", out_dir.display()))?;

    write_schema(&out_dir, "launch-spec", &schema_for!(LaunchSpec))?;
    write_schema(&out_dir, "process-exit", &schema_for!(ProcessExit))?;
    Ok(())
}

fn default_out_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("schemas")
}

fn write_schema(dir: &Path, name: &str, schema: &RootSchema) -> Result<()> {
    let path = dir.join(format!("{}.schema.json", name));
    let json = serde_json::to_string_pretty(schema)?;
    fs::write(&path, json + "\n").with_context(|| format!("writing {}", path.display()))?;
    println!("Generated {}", path.display());
    Ok(())
}
