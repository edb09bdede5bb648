//! Errors reported by user-supplied value hooks.

use std::borrow::Cow;
use thiserror::Error;

/// Failure raised by a [`CustomValue`](crate::CustomValue) hash or equality
/// override.
///
/// The map never hands this back to its callers: a failing override is logged
/// and the structural algorithm is used in its place.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("value hook failed: {0}")]
pub struct HookError(Cow<'static, str>);

impl HookError {
    pub fn new(message: impl Into<Cow<'static, str>>) -> Self {
        HookError(message.into())
    }

    pub fn message(&self) -> &str {
        &self.0
    }
}
