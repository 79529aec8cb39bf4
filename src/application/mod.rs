pub mod bootstrap;
pub mod commands;
pub mod poll_loop;
pub mod probe;
pub mod reconciler;

#[cfg(test)]
pub(crate) mod fakes;
