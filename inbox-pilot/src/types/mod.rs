pub mod briefing;
pub mod message;
pub mod trace;
pub mod user;

pub use briefing::{Briefing, LatestBriefing, ProcessedEmail};
pub use message::{Envelope, MailCredential, RawMessage};
pub use trace::{Outcome, TraceEvent, TraceStep};
pub use user::{User, UserSettings};

pub use email_classifier::Category;
