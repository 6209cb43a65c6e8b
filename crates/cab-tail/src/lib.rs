mod tailer;

pub use tailer::{LineTailer, TailEvent, TailerOptions};
