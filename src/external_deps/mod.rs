//! Integrations that rely on third-party services.
//!
//! Currently the captcha solving providers the challenge resolver delegates to.

pub mod captcha;
