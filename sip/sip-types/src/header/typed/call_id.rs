use crate::Name;
use crate::header::string_header;

string_header!(
    /// `Call-ID` header
    CallID,
    Name::CALL_ID
);
