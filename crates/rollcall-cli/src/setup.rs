//! `rollcall setup`: downloads the ONNX models used for face detection.

use anyhow::{Context, Result};
use rollcall_models::{model_status, verify_file, verify_model, ModelFile, ModelStatus, MODELS};
use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

/// Download a single model file with progress output.
fn download_model(model: &ModelFile, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension("onnx.part");

    println!("  downloading {} ({})...", model.name, model.size_display);
    tracing::info!(url = model.url, dest = %dest.display(), "downloading model");

    let resp = ureq::get(model.url)
        .call()
        .with_context(|| format!("failed to download {}", model.url))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buf = [0u8; 65536];
    let mut total: u64 = 0;
    let mut last_pct: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;

        // Print progress every 10%
        if let Some(len) = content_length.filter(|&len| len > 0) {
            let pct = (total * 100) / len;
            if pct / 10 > last_pct / 10 {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                last_pct = pct;
            }
        }
    }

    file.flush()?;
    drop(file);

    print!("  verifying checksum... ");
    io::stdout().flush().ok();
    if let Err(e) = verify_file(model, &tmp_path) {
        fs::remove_file(&tmp_path).ok();
        return Err(e.into());
    }
    println!("ok");

    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    Ok(())
}

/// Download and verify every model missing from `dir` or failing its checksum.
pub fn run(dir: &Path) -> Result<()> {
    println!("Model directory: {}", dir.display());

    fs::create_dir_all(dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut downloaded = 0;
    let mut skipped = 0;

    for model in MODELS {
        match model_status(dir, model) {
            ModelStatus::Ready => {
                println!("  {} already present (checksum ok)", model.name);
                skipped += 1;
                continue;
            }
            ModelStatus::Corrupt => println!("  {} exists but fails its checksum, re-downloading", model.name),
            ModelStatus::Missing => {}
        }

        download_model(model, &dir.join(model.name))?;
        downloaded += 1;
    }

    for model in MODELS {
        verify_model(dir, model.name)?;
    }

    println!();
    if downloaded > 0 {
        println!("Setup complete: {downloaded} model(s) downloaded, {skipped} already present.");
    } else {
        println!("All models already present. Nothing to download.");
    }

    Ok(())
}
