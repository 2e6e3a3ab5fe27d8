use inquire::Confirm;

use crate::error::DevboxError;

/// Where lifecycle messages and questions go.
pub trait Ui: Send + Sync {
    fn say(&self, message: &str);
    fn confirm(&self, prompt: &str) -> Result<bool, DevboxError>;
}

pub struct TerminalUi;

impl Ui for TerminalUi {
    fn say(&self, message: &str) {
        println!("{message}");
    }

    fn confirm(&self, prompt: &str) -> Result<bool, DevboxError> {
        Confirm::new(prompt)
            .with_default(false)
            .prompt()
            .map_err(map_inquire_err)
    }
}

fn map_inquire_err(e: inquire::InquireError) -> DevboxError {
    match e {
        inquire::InquireError::OperationCanceled | inquire::InquireError::OperationInterrupted => {
            DevboxError::PromptCancelled
        }
        other => DevboxError::Validation {
            message: format!("prompt error: {other}"),
        },
    }
}
