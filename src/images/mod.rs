//! Container image lists and bulk transfer
//!
//! Lists come from a file, from default list files, or from a small
//! built-in set per scope.

pub mod list;
pub mod transfer;

pub use list::{load_image_list, parse_image_list, resolve_images, save_image_list, Image, Scope};
pub use transfer::ImageManager;
