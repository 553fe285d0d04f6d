pub mod display;

pub use display::{initials, relative_time, shorten_cwd, status_label};
