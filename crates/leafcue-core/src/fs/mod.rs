/// On-disk formats and raw volume access
pub mod btrfs;
pub mod common;

pub use common::{BlockDevice, DiskImage};
