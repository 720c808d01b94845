mod enums;
mod header;
mod message;
mod names;
mod question;
mod resource_record;

pub use enums::{DnsClass, DnsType, RCode};
pub use header::DnsHeader;
pub use message::Message;
pub use names::{canonicalize, display_without_dot};
pub use question::DnsQuestion;
pub use resource_record::{RData, ResourceRecord};
