//! Platform-specific locations.

pub mod paths;

/// Number of worker processes to run when nothing else is configured.
pub fn available_cores() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}
