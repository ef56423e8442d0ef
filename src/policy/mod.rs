//! Reference policy modules
//!
//! - [`LossStreakRisk`]: risk, throttles strategies on losing streaks
//! - [`FillExposureLiquidity`]: liquidity, scales sizing by filled exposure
//! - [`PassRateOptimizer`]: optimizer, deactivates low pass-rate strategies

pub mod liquidity;
pub mod optimizer;
pub mod risk;

pub use liquidity::{FillExposureConfig, FillExposureLiquidity};
pub use optimizer::{PassRateConfig, PassRateOptimizer, Tally};
pub use risk::{LossStreakRisk, LossStreakRiskConfig};
