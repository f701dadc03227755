/// The closed set of record types a session speaks. Anything else on the
/// wire is a protocol violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RecordType {
    Hello,
    AuthHello,
    Send,
    StatusSend,
    Acknowledge,
    Redirect,
}

impl RecordType {
    pub fn name(self) -> &'static str {
        match self {
            RecordType::Hello => "Hello",
            RecordType::AuthHello => "AuthHello",
            RecordType::Send => "Send",
            RecordType::StatusSend => "StatusSend",
            RecordType::Acknowledge => "Acknowledge",
            RecordType::Redirect => "Redirect",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Hello" => Some(RecordType::Hello),
            "AuthHello" => Some(RecordType::AuthHello),
            "Send" => Some(RecordType::Send),
            "StatusSend" => Some(RecordType::StatusSend),
            "Acknowledge" => Some(RecordType::Acknowledge),
            "Redirect" => Some(RecordType::Redirect),
            _ => None,
        }
    }
}
