//! On-disk artifacts: feature arrays in `.npy` and plain-text curves and labels.

pub mod npy;
pub mod text;

pub use npy::{NpyElement, load_stack, read_array, save_stack, stack_blocks, write_array};
pub use text::{read_curve, read_labels, write_curve, write_labels};
