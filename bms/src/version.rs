//! Firmware version descriptor
//!
//! Filled in by the build system in a release build; the values here are
//! the development defaults. The boot announcement frame transmits this
//! information together with the MCU device ID.

/// Version information of the running firmware.
#[derive(Debug, Copy, Clone)]
pub struct VersionInfo {
    /// Major version number.
    pub major: u8,
    /// Minor version number.
    pub minor: u8,
    /// Patch version number.
    pub patch: u8,
    /// `true` if the firmware was built from a version controlled tree.
    pub under_version_control: bool,
    /// `true` if the tree had local modifications at build time.
    pub is_dirty: bool,
    /// Number of commits since the last release tag.
    pub distance_from_last_release: u16,
}

/// Version of this firmware build.
pub const VERSION: VersionInfo = VersionInfo {
    major: 0,
    minor: 1,
    patch: 0,
    under_version_control: true,
    is_dirty: false,
    distance_from_last_release: 0,
};
