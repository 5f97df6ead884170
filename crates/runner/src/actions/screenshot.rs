//! screenshot: capture, crop, and compare against the file already on disk

use serde_json::json;
use std::path::Path;
use tracing::info;

use docrun_common::step::{ElementTarget, Overwrite, ScreenshotStep};

use super::{find_element, ActionContext, StepOutcome};
use crate::error::RunnerResult;
use crate::visual;

pub(super) async fn capture(step: &ScreenshotStep, ctx: &mut ActionContext<'_>) -> RunnerResult<StepOutcome> {
    let driver = ctx.driver()?;
    let mut png = driver.screenshot().await?;

    if let Some(crop) = &step.crop {
        let target = ElementTarget::criteria(crop.criteria.clone(), None);
        let lookup = find_element(&target, driver.as_ref()).await;
        let Some(element) = lookup.element else {
            return Ok(StepOutcome::fail(format!(
                "Couldn't find the element to crop to: {}",
                lookup.outcome.description
            )));
        };
        let rect = driver.element_rect(&element).await?;
        let scale = driver
            .execute_script("return window.devicePixelRatio;", vec![])
            .await
            .ok()
            .and_then(|v| v.as_f64())
            .unwrap_or(1.0);
        png = visual::crop_png(&png, rect, crop.padding, scale)?;
    }

    let default_name = format!("{}.png", ctx.step_id);
    let path = ctx.output_path(step.path.as_deref(), step.directory.as_deref(), &default_name);

    if !path.exists() {
        write_png(&path, &png).await?;
        ctx.changed_files.record(&path);
        return Ok(
            StepOutcome::pass(format!("Saved screenshot to {}.", path.display())).with_outputs(json!({
                "screenshotPath": path,
                "changed": true,
            })),
        );
    }

    if step.overwrite == Overwrite::Always {
        write_png(&path, &png).await?;
        ctx.changed_files.record(&path);
        return Ok(
            StepOutcome::pass(format!("Overwrote screenshot at {}.", path.display())).with_outputs(json!({
                "screenshotPath": path,
                "changed": true,
            })),
        );
    }

    let existing = tokio::fs::read(&path).await?;
    let diff = visual::compare(&png, &existing)?;
    let percent = diff.variation * 100.0;
    let max_percent = step.max_variation * 100.0;

    if !diff.exceeds(step.max_variation) {
        return Ok(StepOutcome::pass(format!(
            "Screenshot matches {} ({:.2}% variation, max {:.2}%).",
            path.display(),
            percent,
            max_percent
        ))
        .with_outputs(json!({
            "screenshotPath": path,
            "variation": diff.variation,
            "changed": false,
        })));
    }

    if step.overwrite == Overwrite::AboveVariation {
        write_png(&path, &png).await?;
        ctx.changed_files.record(&path);
        info!("Replaced {} ({:.2}% variation)", path.display(), percent);
        return Ok(StepOutcome::warning(format!(
            "Screenshot variation {:.2}% exceeds max {:.2}%. Replaced {}.",
            percent,
            max_percent,
            path.display()
        ))
        .with_outputs(json!({
            "screenshotPath": path,
            "variation": diff.variation,
            "changed": true,
        })));
    }

    Ok(StepOutcome::fail(format!(
        "Screenshot variation {:.2}% exceeds max {:.2}% for {}.",
        percent,
        max_percent,
        path.display()
    ))
    .with_outputs(json!({
        "screenshotPath": path,
        "variation": diff.variation,
        "changed": false,
    })))
}

async fn write_png(path: &Path, png: &[u8]) -> RunnerResult<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, png).await?;
    Ok(())
}
