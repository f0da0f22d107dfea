pub mod diff;
pub mod episode;
pub mod history;
pub mod pipeline;
pub mod render;
pub mod source;
