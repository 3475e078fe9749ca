//! Logo tier selection.

use crate::config::AssetsConfig;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Height from which the 1080 overlay is used.
pub const HD1080_MIN_HEIGHT: u32 = 1080;

/// The selected overlay file does not exist.
#[derive(Debug, Error)]
#[error("Logo asset for tier {tier} not found: {}", .path.display())]
pub struct AssetMissingError {
    pub tier: LogoTier,
    pub path: PathBuf,
}

/// Resolution class of an overlay asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogoTier {
    Hd720,
    Hd1080,
}

impl LogoTier {
    /// Pick the tier for a video height.
    pub fn for_height(height: u32) -> Self {
        if height >= HD1080_MIN_HEIGHT {
            LogoTier::Hd1080
        } else {
            LogoTier::Hd720
        }
    }

    /// Tier key as used in asset names.
    pub fn key(&self) -> &'static str {
        match self {
            LogoTier::Hd720 => "720",
            LogoTier::Hd1080 => "1080",
        }
    }
}

impl std::fmt::Display for LogoTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.key())
    }
}

/// Where the overlay for a tier is expected to live.
pub fn logo_path(tier: LogoTier, assets: &AssetsConfig) -> PathBuf {
    let name = match tier {
        LogoTier::Hd720 => &assets.logo_720,
        LogoTier::Hd1080 => &assets.logo_1080,
    };
    assets.dir.join(name)
}

/// Select the overlay for a video height and check that it exists.
pub fn select_logo(height: u32, assets: &AssetsConfig) -> Result<PathBuf, AssetMissingError> {
    let tier = LogoTier::for_height(height);
    let path = logo_path(tier, assets);
    if path.is_file() {
        Ok(path)
    } else {
        Err(AssetMissingError { tier, path })
    }
}
