// Challenge page detection and the captcha-backed resolver the fetch engine hands them to.

pub mod detectors;
pub mod resolver;

pub use detectors::{ChallengeDetection, ChallengeDetector};
pub use resolver::ChallengeResolver;
