/// Random-access sources for raw volume data
mod types;

pub use types::{BlockDevice, DiskImage};
