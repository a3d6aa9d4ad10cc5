mod detector;
mod helm;
mod installer;

pub use detector::{ComponentDetector, DetectedComponents};
pub use helm::{ChartSpec, Helm, HelmRelease};
pub use installer::{chart_for, plan, ComponentInstaller, ComponentKind};
