/// Update filtering and message intake
pub mod handlers;
/// Outbound sends through the Bot API
pub mod sender;

pub use handlers::{schema, ChatFilter};
pub use sender::TelegramSender;
