//! Verify command - checks a published image against its record.

use anyhow::{bail, Result};

use super::load_recipe;
use crate::build::executor::in_image;
use crate::build::BuildRecord;
use crate::config::Config;
use crate::lock;
use crate::ownership;

pub fn cmd_verify(config: &Config) -> Result<()> {
    let recipe = load_recipe(config)?;
    let image = config.image_dir();
    let record = BuildRecord::load(&config.output.join("image.json"))?;
    let mut failures = Vec::new();

    println!("Verifying {}...\n", image.display());
    if !image.is_dir() {
        bail!("Image directory {} is missing", image.display());
    }

    let tool = in_image(&image, &record.tool_path);
    if tool.is_file() {
        println!("  [OK] tool at {}", record.tool_path);
    } else {
        failures.push(format!("tool missing at {}", record.tool_path));
    }

    if record.entrypoint.first() == Some(&record.tool_path) {
        println!("  [OK] entry point {}", record.entrypoint.join(" "));
    } else {
        failures.push("entry point does not use the placed tool".to_string());
    }

    let identity = &record.identity;
    match ownership::verify_owned(&in_image(&image, &record.workdir), identity.uid, identity.gid) {
        Ok(()) => println!("  [OK] {} owned by {}", record.workdir, identity.numeric()),
        Err(e) => failures.push(e.to_string()),
    }

    match lock::verify(
        &recipe.manifest_path(&config.project),
        &recipe.lock_path(&config.project),
    ) {
        Ok(report) if report.digest == record.closure_digest => {
            println!("  [OK] closure digest matches the current lock")
        }
        Ok(report) => failures.push(format!(
            "closure digest {} differs from the current lock ({})",
            record.closure_digest, report.digest
        )),
        Err(e) => failures.push(format!("{:#}", e)),
    }

    if record.recipe_digest != recipe.digest() {
        println!("  [WARN] recipe changed since this image was built");
    }

    if !failures.is_empty() {
        for failure in &failures {
            println!("  [FAIL] {}", failure);
        }
        bail!("Verification failed: {} problem(s)", failures.len());
    }
    println!("\nImage verified.");
    Ok(())
}
