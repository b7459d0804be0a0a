pub(crate) mod config;
pub(crate) mod container;
pub(crate) mod fs;
pub(crate) mod pipeline;
pub(crate) mod signing;
pub(crate) mod tooling;

#[cfg(test)]
pub(crate) mod test_support;
