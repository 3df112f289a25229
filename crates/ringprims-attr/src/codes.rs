//! Attribute and notification code table.
//!
//! These values are shared with the peer domain and must not change.

use std::fmt;

use crate::error::AttrError;

/// Fixed attribute: start of a record.
pub const DATA_START: u16 = 1;
/// Notification message: a record has started.
pub const NOTIFY_DATA_START: u16 = 2;
/// Fixed attribute: end of a record.
pub const DATA_END: u16 = 3;
/// Notification message: a record has ended.
pub const NOTIFY_DATA_END: u16 = 4;
/// Fixed attribute: the remote side is shutting down.
pub const REMOTE_SHUTDOWN: u16 = 5;
/// Notification message: the remote side is shutting down.
pub const NOTIFY_REMOTE_SHUTDOWN: u16 = 6;

/// Message code carried by watermark wakes.
pub const NOTIFY_NONE: u16 = 0;
/// Variable attribute type whose first word is the byte count of the next record.
pub const VARIABLE_RECORD_SIZE: u16 = 0;

/// Fixed attribute types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttrType {
    DataStart,
    DataEnd,
    RemoteShutdown,
}

impl AttrType {
    pub fn code(self) -> u16 {
        match self {
            AttrType::DataStart => DATA_START,
            AttrType::DataEnd => DATA_END,
            AttrType::RemoteShutdown => REMOTE_SHUTDOWN,
        }
    }
}

impl TryFrom<u16> for AttrType {
    type Error = AttrError;

    fn try_from(code: u16) -> Result<Self, Self::Error> {
        match code {
            DATA_START => Ok(AttrType::DataStart),
            DATA_END => Ok(AttrType::DataEnd),
            REMOTE_SHUTDOWN => Ok(AttrType::RemoteShutdown),
            other => Err(AttrError::UnknownType(other)),
        }
    }
}

impl fmt::Display for AttrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttrType::DataStart => f.write_str("DATA_START"),
            AttrType::DataEnd => f.write_str("DATA_END"),
            AttrType::RemoteShutdown => f.write_str("REMOTE_SHUTDOWN"),
        }
    }
}

/// Notification message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotifyCode {
    /// Watermark wake without a message.
    Wake,
    DataStart,
    DataEnd,
    RemoteShutdown,
}

impl NotifyCode {
    pub fn code(self) -> u16 {
        match self {
            NotifyCode::Wake => NOTIFY_NONE,
            NotifyCode::DataStart => NOTIFY_DATA_START,
            NotifyCode::DataEnd => NOTIFY_DATA_END,
            NotifyCode::RemoteShutdown => NOTIFY_REMOTE_SHUTDOWN,
        }
    }

    /// Interpret a raw message; unknown codes are plain wakes.
    pub fn from_msg(msg: u16) -> Self {
        match msg {
            NOTIFY_DATA_START => NotifyCode::DataStart,
            NOTIFY_DATA_END => NotifyCode::DataEnd,
            NOTIFY_REMOTE_SHUTDOWN => NotifyCode::RemoteShutdown,
            _ => NotifyCode::Wake,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_table_values() {
        assert_eq!(DATA_START, 1);
        assert_eq!(NOTIFY_DATA_START, 2);
        assert_eq!(DATA_END, 3);
        assert_eq!(NOTIFY_DATA_END, 4);
        assert_eq!(REMOTE_SHUTDOWN, 5);
        assert_eq!(NOTIFY_REMOTE_SHUTDOWN, 6);
    }

    #[test]
    fn attr_type_round_trips_through_code() {
        for ty in [AttrType::DataStart, AttrType::DataEnd, AttrType::RemoteShutdown] {
            assert_eq!(AttrType::try_from(ty.code()).unwrap(), ty);
        }
        assert_eq!(AttrType::try_from(2), Err(AttrError::UnknownType(2)));
    }

    #[test]
    fn unknown_notify_is_wake() {
        assert_eq!(NotifyCode::from_msg(6), NotifyCode::RemoteShutdown);
        assert_eq!(NotifyCode::from_msg(0), NotifyCode::Wake);
        assert_eq!(NotifyCode::from_msg(99), NotifyCode::Wake);
    }
}
