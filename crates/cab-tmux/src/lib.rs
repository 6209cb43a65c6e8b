mod driver;
mod error;

pub use driver::{
    CaptureOptions, CreateSessionOptions, PasteBuffer, SendKeys, TmuxDriver, TmuxSessionInfo,
};
pub use error::TmuxError;
