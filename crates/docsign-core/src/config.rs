//! Tunables for the commit protocol

use serde::{Deserialize, Serialize};
use shared_types::FontSizeBounds;
use std::time::Duration;

/// Signing configuration shared by every commit a [`crate::Signer`] runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Pixel width the page was rendered at in the editor
    pub render_width: f64,
    pub font_size_min: f64,
    pub font_size_max: f64,
    /// Lifetime of download URLs handed to clients
    pub signed_url_ttl_secs: u64,
    pub artifact_content_type: String,
}

impl Default for SigningConfig {
    fn default() -> Self {
        let bounds = FontSizeBounds::default();
        Self {
            render_width: 600.0,
            font_size_min: bounds.min,
            font_size_max: bounds.max,
            signed_url_ttl_secs: 3600,
            artifact_content_type: "application/pdf".to_string(),
        }
    }
}

impl SigningConfig {
    pub fn font_size_bounds(&self) -> FontSizeBounds {
        FontSizeBounds {
            min: self.font_size_min,
            max: self.font_size_max,
        }
    }

    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }

    pub fn validate(&self) -> Result<(), String> {
        if !self.render_width.is_finite() || self.render_width <= 0.0 {
            return Err(format!(
                "render_width must be positive, got {}",
                self.render_width
            ));
        }
        if !(self.font_size_min.is_finite() && self.font_size_max.is_finite())
            || self.font_size_min <= 0.0
            || self.font_size_min > self.font_size_max
        {
            return Err(format!(
                "font size bounds {}..={} are not a valid range",
                self.font_size_min, self.font_size_max
            ));
        }
        if self.signed_url_ttl_secs == 0 {
            return Err("signed_url_ttl_secs must be at least 1".to_string());
        }
        if self.artifact_content_type.trim().is_empty() {
            return Err("artifact_content_type must not be empty".to_string());
        }
        Ok(())
    }
}
