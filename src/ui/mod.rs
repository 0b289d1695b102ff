//! Terminal output for the lfx CLI
//!
//! Interactive terminals get cliclack log lines and indicatif transfer
//! bars; CI and pipes get plain, line-oriented text.

mod context;
mod output;
mod progress;
mod prompts;

pub use context::UiContext;
pub use output::{
    format_bytes, intro, key_value, outro_success, remark, section, step_info, step_ok,
    step_ok_detail, step_warn, step_warn_hint,
};
pub use progress::TransferProgress;
pub use prompts::confirm;
