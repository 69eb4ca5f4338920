/// Highest level on the hub's native scale (lights and covers).
pub const NATIVE_MAX: u8 = 100;

/// Highest brightness on the external entity scale.
pub const EXTERNAL_MAX: u8 = 255;

/// Native position at or above which a cover is reported OPEN.
///
/// Not configurable: every place that derives cover state goes through
/// [`crate::convert::is_cover_open`].
pub const COVER_OPEN_THRESHOLD: u8 = 5;

/// mDNS service type advertised by Smart Bridges.
pub const SERVICE_NAME: &str = "_lutron._tcp";

/// TLS port of the bridge's LEAP endpoint.
pub const LEAP_PORT: u16 = 8081;

/// Hub type tags of on/off-only switch families.
///
/// Devices with one of these tags never expose a dim capability, even when
/// the hub files them under the light domain.
pub const SWITCH_TYPES: &[&str] = &[
    "WallSwitch",
    "OutdoorPlugInSwitch",
    "PlugInSwitch",
    "InLineSwitch",
    "PowPakSwitch",
    "SunnataSwitch",
    "TempInWallPaddleSwitch",
    "Switched",
];
