use anyhow::{anyhow, Result};
use url::Url;

use crate::models::image_job::SUPPORTED_IMAGE_SIZES;
use crate::models::video_job::{MAX_DURATION_SECS, MIN_DURATION_SECS};

pub const MAX_TITLE_LEN: usize = 255;

/// Validate that a string is a valid URL with http or https scheme
pub fn validate_url(url_str: &str) -> Result<Url> {
    let url = Url::parse(url_str).map_err(|e| anyhow!("Invalid URL format: {}", e))?;

    // Only allow http and https schemes
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(anyhow!(
            "URL must use http or https scheme, got: {}",
            url.scheme()
        ));
    }

    // Must have a host
    if url.host_str().is_none() {
        return Err(anyhow!("URL must have a host"));
    }

    Ok(url)
}

/// Validate that a prompt carries some text
pub fn validate_prompt(field: &str, prompt: &str) -> Result<()> {
    if prompt.trim().is_empty() {
        return Err(anyhow!("{} must not be empty", field));
    }
    Ok(())
}

/// Validate a row title (1-255 characters)
pub fn validate_title(title: &str) -> Result<()> {
    let len = title.chars().count();
    if len == 0 || len > MAX_TITLE_LEN {
        return Err(anyhow!(
            "Title must be between 1 and {} characters",
            MAX_TITLE_LEN
        ));
    }
    Ok(())
}

/// Validate that an image size is one the image provider accepts
pub fn validate_image_size(size: &str) -> Result<()> {
    if SUPPORTED_IMAGE_SIZES.contains(&size) {
        Ok(())
    } else {
        Err(anyhow!(
            "Unsupported size '{}'. Supported: {}",
            size,
            SUPPORTED_IMAGE_SIZES.join(", ")
        ))
    }
}

/// Validate a requested video duration in seconds
pub fn validate_duration(duration: i32) -> Result<()> {
    if (MIN_DURATION_SECS..=MAX_DURATION_SECS).contains(&duration) {
        Ok(())
    } else {
        Err(anyhow!(
            "Duration must be between {} and {} seconds, got {}",
            MIN_DURATION_SECS,
            MAX_DURATION_SECS,
            duration
        ))
    }
}
