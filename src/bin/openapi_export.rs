use std::{fs, path::PathBuf};

use anyhow::Context;
use pay_orchestrator::openapi::ApiDocV1;
use utoipa::OpenApi;

fn main() -> anyhow::Result<()> {
    let openapi = ApiDocV1::openapi();
    let json = serde_json::to_string_pretty(&openapi)?;

    let output_dir = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("openapi"));
    fs::create_dir_all(&output_dir)
        .with_context(|| format!("creating {}", output_dir.display()))?;

    let output_path = output_dir.join("pay-orchestrator.v1.json");
    fs::write(&output_path, json).with_context(|| format!("writing {}", output_path.display()))?;

    println!("OpenAPI document written to {}", output_path.display());
    Ok(())
}
