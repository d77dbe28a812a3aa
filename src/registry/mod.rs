//! Harbor registry management and registry-to-registry image sync

pub mod certs;
pub mod harbor;
pub mod sync;

pub use certs::{CertConfig, CertGenerator};
pub use harbor::HarborManager;
pub use sync::{read_image_list, ImageMover, RegistrySyncer};
