mod asset;
mod checkpoint;
mod concentration;
mod price_cap;

pub use asset::{AssetPlatform, TrackedAsset};
pub use checkpoint::{ImportCheckpoint, Stream};
pub use concentration::ConcentrationSample;
pub use price_cap::PriceCapSample;
