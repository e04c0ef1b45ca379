pub(crate) mod concurrent;
pub(crate) mod error;
