use std::fmt;

use serde::{Deserialize, Serialize};

/// Companion device platform announced when linking.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlatformType {
    #[default]
    Unknown,
    Chrome,
    Firefox,
    Ie,
    Opera,
    Safari,
    Edge,
    Desktop,
    Ipad,
    AndroidTablet,
    Ohana,
    Aloha,
    Catalina,
    TclTv,
    IosPhone,
    IosCatalyst,
    AndroidPhone,
    AndroidAmbiguous,
    WearOs,
    ArWrist,
    ArDevice,
    Uwp,
    Vr,
}

/// Platform used when the user row carries none.
pub const DEFAULT_PLATFORM: PlatformType = PlatformType::Chrome;

/// OS name used when the user row carries none.
pub const DEFAULT_OS_NAME: &str = "Mac OS 10";

impl PlatformType {
    pub const VARIANTS: [PlatformType; 23] = [
        PlatformType::Unknown,
        PlatformType::Chrome,
        PlatformType::Firefox,
        PlatformType::Ie,
        PlatformType::Opera,
        PlatformType::Safari,
        PlatformType::Edge,
        PlatformType::Desktop,
        PlatformType::Ipad,
        PlatformType::AndroidTablet,
        PlatformType::Ohana,
        PlatformType::Aloha,
        PlatformType::Catalina,
        PlatformType::TclTv,
        PlatformType::IosPhone,
        PlatformType::IosCatalyst,
        PlatformType::AndroidPhone,
        PlatformType::AndroidAmbiguous,
        PlatformType::WearOs,
        PlatformType::ArWrist,
        PlatformType::ArDevice,
        PlatformType::Uwp,
        PlatformType::Vr,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "UNKNOWN",
            Self::Chrome => "CHROME",
            Self::Firefox => "FIREFOX",
            Self::Ie => "IE",
            Self::Opera => "OPERA",
            Self::Safari => "SAFARI",
            Self::Edge => "EDGE",
            Self::Desktop => "DESKTOP",
            Self::Ipad => "IPAD",
            Self::AndroidTablet => "ANDROID_TABLET",
            Self::Ohana => "OHANA",
            Self::Aloha => "ALOHA",
            Self::Catalina => "CATALINA",
            Self::TclTv => "TCL_TV",
            Self::IosPhone => "IOS_PHONE",
            Self::IosCatalyst => "IOS_CATALYST",
            Self::AndroidPhone => "ANDROID_PHONE",
            Self::AndroidAmbiguous => "ANDROID_AMBIGUOUS",
            Self::WearOs => "WEAR_OS",
            Self::ArWrist => "AR_WRIST",
            Self::ArDevice => "AR_DEVICE",
            Self::Uwp => "UWP",
            Self::Vr => "VR",
        }
    }

    /// Case-insensitive lookup. An empty tag means [`DEFAULT_PLATFORM`];
    /// anything unrecognised is [`PlatformType::Unknown`].
    pub fn resolve(tag: &str) -> Self {
        let tag = tag.trim();
        if tag.is_empty() {
            return DEFAULT_PLATFORM;
        }
        Self::VARIANTS
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(tag))
            .unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for PlatformType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
