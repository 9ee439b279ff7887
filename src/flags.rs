//! Bit vocabularies of the TeamTalk 5 text protocol and their human
//! renderings used in event log lines.

/// Channel option bits (the `type` parameter of channel frames).
pub mod channel {
    pub const DEFAULT: u32 = 0x0000;
    pub const PERMANENT: u32 = 0x0001;
    pub const SOLO_TRANSMIT: u32 = 0x0002;
    pub const CLASSROOM: u32 = 0x0004;
    pub const OPERATOR_RECV_ONLY: u32 = 0x0008;
    pub const NO_VOICE_ACTIVATION: u32 = 0x0010;
    pub const NO_RECORDING: u32 = 0x0020;
}

/// User right bits (the `userrights` parameter).
pub mod right {
    pub const MULTI_LOGIN: u32 = 0x0000_0001;
    pub const VIEW_ALL_USERS: u32 = 0x0000_0002;
    pub const CREATE_TEMPORARY_CHANNEL: u32 = 0x0000_0004;
    pub const MODIFY_CHANNELS: u32 = 0x0000_0008;
    pub const TEXT_MESSAGE_BROADCAST: u32 = 0x0000_0010;
    pub const KICK_USERS: u32 = 0x0000_0020;
    pub const BAN_USERS: u32 = 0x0000_0040;
    pub const MOVE_USERS: u32 = 0x0000_0080;
    pub const OPERATOR_ENABLE: u32 = 0x0000_0100;
    pub const UPLOAD_FILES: u32 = 0x0000_0200;
    pub const DOWNLOAD_FILES: u32 = 0x0000_0400;
    pub const UPDATE_SERVER_PROPERTIES: u32 = 0x0000_0800;
    pub const TRANSMIT_VOICE: u32 = 0x0000_1000;
    pub const TRANSMIT_VIDEO_CAPTURE: u32 = 0x0000_2000;
    pub const TRANSMIT_DESKTOP: u32 = 0x0000_4000;
    pub const TRANSMIT_DESKTOP_INPUT: u32 = 0x0000_8000;
    pub const TRANSMIT_MEDIA_FILE_AUDIO: u32 = 0x0001_0000;
    pub const TRANSMIT_MEDIA_FILE_VIDEO: u32 = 0x0002_0000;
}

/// Subscription bits (`sublocal` / `subpeer` parameters).
pub mod sub {
    pub const USER_MSG: u32 = 0x0000_0001;
    pub const CHANNEL_MSG: u32 = 0x0000_0002;
    pub const BROADCAST_MSG: u32 = 0x0000_0004;
    pub const CUSTOM_MSG: u32 = 0x0000_0008;
    pub const VOICE: u32 = 0x0000_0010;
    pub const VIDEO_CAPTURE: u32 = 0x0000_0020;
    pub const DESKTOP: u32 = 0x0000_0040;
    pub const DESKTOP_INPUT: u32 = 0x0000_0080;
    pub const MEDIA_FILE: u32 = 0x0000_0100;
    pub const INTERCEPT_USER_MSG: u32 = 0x0001_0000;
    pub const INTERCEPT_CHANNEL_MSG: u32 = 0x0002_0000;
    pub const INTERCEPT_CUSTOM_MSG: u32 = 0x0008_0000;
    pub const INTERCEPT_VOICE: u32 = 0x0010_0000;
    pub const INTERCEPT_VIDEO_CAPTURE: u32 = 0x0020_0000;
    pub const INTERCEPT_DESKTOP: u32 = 0x0040_0000;
    pub const INTERCEPT_MEDIA_FILE: u32 = 0x0100_0000;
}

/// User account types (the `usertype` parameter).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UserType {
    #[default]
    None,
    Default,
    Admin,
}

impl UserType {
    pub fn from_raw(raw: i64) -> Self {
        match raw {
            1 => Self::Default,
            2 => Self::Admin,
            _ => Self::None,
        }
    }

    pub fn as_raw(self) -> i64 {
        match self {
            Self::None => 0,
            Self::Default => 1,
            Self::Admin => 2,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "unauthorized",
            Self::Default => "default",
            Self::Admin => "admin",
        }
    }
}

/// Status modes (the `statusmode` parameter). An all-zero mode renders
/// as "online".
pub mod status {
    pub const NONE: i64 = 0;
    pub const AWAY: i64 = 1;
    pub const QUESTION: i64 = 2;
}

/// Text message classes (the `type` parameter of `message` frames).
pub mod msg {
    pub const USER: i64 = 1;
    pub const CHANNEL: i64 = 2;
    pub const BROADCAST: i64 = 3;
    pub const CUSTOM: i64 = 4;
}

/// Flag membership test. By convention an all-zero flag is considered
/// present in an all-zero mask, which is what makes zero vocabularies
/// ("default", "online") render.
pub fn has_flag(mask: u32, flag: u32) -> bool {
    if mask == 0 && flag == 0 {
        return true;
    }
    mask & flag != 0
}

/// Rights check honoring the admin override: an admin account implicitly
/// holds every right.
pub fn has_right(rights: u32, user_type: UserType, flag: u32) -> bool {
    if user_type == UserType::Admin {
        return true;
    }
    has_flag(rights, flag)
}

fn join(parts: Vec<&'static str>) -> String {
    parts.join(", ")
}

/// Render a subscription mask, e.g. `0x3` → "private messages, channel
/// messages". An empty mask renders as the empty string.
pub fn subscriptions_str(mask: u32) -> String {
    const NAMES: &[(u32, &str)] = &[
        (sub::USER_MSG, "private messages"),
        (sub::CHANNEL_MSG, "channel messages"),
        (sub::BROADCAST_MSG, "broadcast messages"),
        (sub::CUSTOM_MSG, "custom private messages"),
        (sub::VOICE, "audio"),
        (sub::VIDEO_CAPTURE, "video"),
        (sub::DESKTOP, "desktop"),
        (sub::DESKTOP_INPUT, "desktop input"),
        (sub::MEDIA_FILE, "media file stream"),
        (sub::INTERCEPT_USER_MSG, "intercept private messages"),
        (sub::INTERCEPT_CHANNEL_MSG, "intercept channel messages"),
        (sub::INTERCEPT_CUSTOM_MSG, "intercept custom private messages"),
        (sub::INTERCEPT_VOICE, "intercept audio"),
        (sub::INTERCEPT_VIDEO_CAPTURE, "intercept video"),
        (sub::INTERCEPT_DESKTOP, "intercept desktop"),
        (sub::INTERCEPT_MEDIA_FILE, "intercept media file stream"),
    ];
    join(
        NAMES
            .iter()
            .filter(|(flag, _)| mask & flag != 0)
            .map(|&(_, name)| name)
            .collect(),
    )
}

/// Render channel options. A zero mask renders as "default".
pub fn channel_options_str(mask: u32) -> String {
    const NAMES: &[(u32, &str)] = &[
        (channel::PERMANENT, "permanent"),
        (channel::SOLO_TRANSMIT, "solo transmit"),
        (channel::CLASSROOM, "classroom"),
        (channel::OPERATOR_RECV_ONLY, "operator receive only"),
        (channel::NO_VOICE_ACTIVATION, "no voice activation"),
        (channel::NO_RECORDING, "no recording"),
    ];
    let mut parts = Vec::new();
    if has_flag(mask, channel::DEFAULT) {
        parts.push("default");
    }
    parts.extend(
        NAMES
            .iter()
            .filter(|(flag, _)| mask & flag != 0)
            .map(|&(_, name)| name),
    );
    join(parts)
}

/// Render a user rights mask.
pub fn user_rights_str(mask: u32) -> String {
    const NAMES: &[(u32, &str)] = &[
        (right::MULTI_LOGIN, "login multiple times"),
        (right::VIEW_ALL_USERS, "view all users"),
        (right::CREATE_TEMPORARY_CHANNEL, "create temporary channels"),
        (right::MODIFY_CHANNELS, "modify channels"),
        (right::TEXT_MESSAGE_BROADCAST, "send broadcast messages"),
        (right::KICK_USERS, "kick users"),
        (right::BAN_USERS, "ban users"),
        (right::MOVE_USERS, "move users between channels"),
        (right::OPERATOR_ENABLE, "make other users channel operators"),
        (right::UPLOAD_FILES, "upload files"),
        (right::DOWNLOAD_FILES, "download files"),
        (right::UPDATE_SERVER_PROPERTIES, "update server properties"),
        (right::TRANSMIT_VOICE, "transmit audio"),
        (right::TRANSMIT_VIDEO_CAPTURE, "transmit video"),
        (right::TRANSMIT_DESKTOP, "transmit desktop"),
        (right::TRANSMIT_DESKTOP_INPUT, "transmit desktop input"),
        (right::TRANSMIT_MEDIA_FILE_AUDIO, "transmit audio media file"),
        (right::TRANSMIT_MEDIA_FILE_VIDEO, "transmit video media file"),
    ];
    if mask == 0 {
        return "none".to_string();
    }
    join(
        NAMES
            .iter()
            .filter(|(flag, _)| mask & flag != 0)
            .map(|&(_, name)| name)
            .collect(),
    )
}

/// Render a status mode. Zero is "online".
pub fn status_mode_str(mode: i64) -> String {
    let mut parts = Vec::new();
    if mode == status::NONE {
        parts.push("online");
    }
    if mode & status::AWAY != 0 {
        parts.push("away");
    }
    if mode & status::QUESTION != 0 {
        parts.push("question");
    }
    join(parts)
}

/// Render a message class.
pub fn message_type_str(kind: i64) -> &'static str {
    match kind {
        msg::USER => "private",
        msg::CHANNEL => "channel",
        msg::BROADCAST => "broadcast",
        msg::CUSTOM => "custom private",
        _ => "unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_flag_in_zero_mask_is_present() {
        assert!(has_flag(0, 0));
        assert!(!has_flag(0x2, 0));
        assert!(!has_flag(0, 0x2));
    }

    #[test]
    fn admin_has_every_right() {
        assert!(has_right(0, UserType::Admin, right::BAN_USERS));
        assert!(!has_right(0, UserType::Default, right::BAN_USERS));
        assert!(has_right(
            right::BAN_USERS,
            UserType::Default,
            right::BAN_USERS
        ));
    }

    #[test]
    fn subscription_rendering() {
        assert_eq!(
            subscriptions_str(sub::USER_MSG | sub::CHANNEL_MSG),
            "private messages, channel messages"
        );
        assert_eq!(subscriptions_str(0), "");
        assert_eq!(
            subscriptions_str(sub::INTERCEPT_USER_MSG),
            "intercept private messages"
        );
    }

    #[test]
    fn channel_options_zero_is_default() {
        assert_eq!(channel_options_str(0), "default");
        assert_eq!(
            channel_options_str(channel::PERMANENT | channel::CLASSROOM),
            "permanent, classroom"
        );
    }

    #[test]
    fn status_mode_zero_is_online() {
        assert_eq!(status_mode_str(0), "online");
        assert_eq!(status_mode_str(status::AWAY), "away");
        assert_eq!(status_mode_str(status::QUESTION), "question");
    }

    #[test]
    fn user_type_round_trip() {
        for raw in [0, 1, 2] {
            assert_eq!(UserType::from_raw(raw).as_raw(), raw);
        }
        assert_eq!(UserType::from_raw(99), UserType::None);
        assert_eq!(UserType::Admin.as_str(), "admin");
    }
}
