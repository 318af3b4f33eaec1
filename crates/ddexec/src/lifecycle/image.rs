//! Image resolution: inspect, pull, or build from inline Dockerfile text.
//!
//! Images built from a Dockerfile carry the sha256 of its text in a label. The image is
//! rebuilt only when that label no longer matches.

use std::collections::BTreeMap;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use super::error::{LifecycleError, LifecycleResult};
use super::LaunchOptions;
use crate::engine::archive::{self, FileMode};
use crate::engine::{BuildOptions, Engine, ImageDetails};
use crate::model::ApplicationSpec;

pub const LABEL_DOCKERFILE_HASH: &str = "ddexec.dockerfile.hash";
pub const LABEL_BUILT_AT: &str = "ddexec.built_at";

/// Hex sha256 of the Dockerfile text.
pub fn dockerfile_hash(dockerfile: &str) -> String {
    hex::encode(Sha256::digest(dockerfile.as_bytes()))
}

/// Make sure the image of `app` exists and is current, and return its details.
pub async fn resolve(
    engine: &dyn Engine,
    app: &ApplicationSpec,
    options: &LaunchOptions,
) -> LifecycleResult<ImageDetails> {
    let image = app.image.as_str();
    let dockerfile = app.dockerfile.as_deref().filter(|d| !d.trim().is_empty());

    let mut details = if options.force_pull() {
        None
    } else {
        engine.inspect_image(image).await?
    };

    if details.is_none() {
        match dockerfile {
            Some(dockerfile) => build(engine, image, dockerfile, options).await?,
            None => engine.pull_image(image).await?,
        }
        details = engine.inspect_image(image).await?;
    }
    let mut details = details.ok_or_else(|| LifecycleError::ImageMissing(image.to_string()))?;

    if let Some(dockerfile) = dockerfile {
        let hash = dockerfile_hash(dockerfile);
        if details.labels.get(LABEL_DOCKERFILE_HASH) == Some(&hash) {
            debug!("Image {} is up to date", image);
        } else {
            info!("Dockerfile of {} changed, rebuilding", image);
            build(engine, image, dockerfile, options).await?;
            details = engine
                .inspect_image(image)
                .await?
                .ok_or_else(|| LifecycleError::ImageMissing(image.to_string()))?;
            if details.labels.get(LABEL_DOCKERFILE_HASH) != Some(&hash) {
                return Err(LifecycleError::ImageHashMismatch {
                    image: image.to_string(),
                });
            }
        }
    }

    Ok(details)
}

async fn build(
    engine: &dyn Engine,
    image: &str,
    dockerfile: &str,
    options: &LaunchOptions,
) -> LifecycleResult<()> {
    debug!("Dockerfile for {}:\n{}", image, dockerfile);
    let context = archive::single_file("Dockerfile", dockerfile.as_bytes(), FileMode::root(0o644))?;

    let labels = BTreeMap::from([
        (
            LABEL_DOCKERFILE_HASH.to_string(),
            dockerfile_hash(dockerfile),
        ),
        (LABEL_BUILT_AT.to_string(), chrono::Utc::now().to_rfc3339()),
    ]);
    let build = BuildOptions {
        tag: image.to_string(),
        labels,
        pull: options.force_pull(),
        no_cache: options.skip_cache(),
    };
    engine.build_image(context, &build).await?;
    Ok(())
}
