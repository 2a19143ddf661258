// Domain layer - Frame format and measurement models
pub mod checksum;
pub mod frame;
pub mod measurement;
