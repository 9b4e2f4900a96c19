//! Input injection payload types.
//!
//! Values mirror the device input framework's constants, so they are
//! serialised as-is without any translation.

use serde::{Deserialize, Serialize};

/// Key event action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAction {
    Down,
    Up,
    Multiple,
}

impl KeyAction {
    /// Wire value of this action.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Down => 0,
            Self::Up => 1,
            Self::Multiple => 2,
        }
    }
}

/// Motion (touch) event action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MotionAction {
    Down,
    Up,
    Move,
    Cancel,
    Outside,
    PointerDown,
    PointerUp,
    HoverMove,
    Scroll,
    HoverEnter,
    HoverExit,
    ButtonPress,
    ButtonRelease,
}

impl MotionAction {
    /// Wire value of this action.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Down => 0,
            Self::Up => 1,
            Self::Move => 2,
            Self::Cancel => 3,
            Self::Outside => 4,
            Self::PointerDown => 5,
            Self::PointerUp => 6,
            Self::HoverMove => 7,
            Self::Scroll => 8,
            Self::HoverEnter => 9,
            Self::HoverExit => 10,
            Self::ButtonPress => 11,
            Self::ButtonRelease => 12,
        }
    }
}

/// Key modifier state bitmask (`META_*` constants on the device).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetaState(pub u32);

impl MetaState {
    pub const NONE: Self = Self(0);
    pub const SHIFT_ON: Self = Self(0x01);
    pub const ALT_ON: Self = Self(0x02);
    pub const SYM_ON: Self = Self(0x04);
    pub const CTRL_ON: Self = Self(0x1000);
    pub const META_ON: Self = Self(0x10000);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for MetaState {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Pressed mouse buttons bitmask (`BUTTON_*` constants on the device).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MouseButtons(pub u32);

impl MouseButtons {
    pub const NONE: Self = Self(0);
    pub const PRIMARY: Self = Self(1 << 0);
    pub const SECONDARY: Self = Self(1 << 1);
    pub const TERTIARY: Self = Self(1 << 2);
    pub const BACK: Self = Self(1 << 3);
    pub const FORWARD: Self = Self(1 << 4);
}

impl std::ops::BitOr for MouseButtons {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Display power mode requested on the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScreenPowerMode {
    Off,
    Normal,
}

impl ScreenPowerMode {
    /// Wire value of this mode.
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Normal => 2,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn meta_state_combines() {
        let meta = MetaState::SHIFT_ON | MetaState::CTRL_ON;
        assert!(meta.contains(MetaState::SHIFT_ON));
        assert!(meta.contains(MetaState::CTRL_ON));
        assert!(!meta.contains(MetaState::ALT_ON));
        assert_eq!(meta.0, 0x1001);
    }

    #[test]
    fn power_mode_codes() {
        assert_eq!(ScreenPowerMode::Off.code(), 0);
        assert_eq!(ScreenPowerMode::Normal.code(), 2);
    }

    #[test]
    fn motion_action_codes_are_distinct() {
        let all = [
            MotionAction::Down,
            MotionAction::Up,
            MotionAction::Move,
            MotionAction::Cancel,
            MotionAction::Outside,
            MotionAction::PointerDown,
            MotionAction::PointerUp,
            MotionAction::HoverMove,
            MotionAction::Scroll,
            MotionAction::HoverEnter,
            MotionAction::HoverExit,
            MotionAction::ButtonPress,
            MotionAction::ButtonRelease,
        ];
        for (i, action) in all.iter().enumerate() {
            assert_eq!(usize::from(action.code()), i);
        }
    }
}
