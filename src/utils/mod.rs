pub mod image_input;
pub mod prompt_ops;

pub use image_input::ImageSource;
