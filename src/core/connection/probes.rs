//! Screen probes for the login sequence.
//!
//! Coordinates assume the client's default 800x600 client area. Thresholds
//! were sampled by hand from the build named in `CALIBRATED_CLIENT_BUILD` and
//! have to be re-measured when the client's login art changes.

use crate::platform::{ClientPoint, Rgb, VirtualKey};

pub const CALIBRATED_CLIENT_BUILD: &str = "2.8.1";

/// One pixel sample and the inclusive color box it must fall into.
#[derive(Debug, Clone, Copy)]
pub struct PixelProbe {
    pub name: &'static str,
    pub at: ClientPoint,
    pub min: Rgb,
    pub max: Rgb,
}

impl PixelProbe {
    pub fn matches(&self, color: Rgb) -> bool {
        (self.min.r..=self.max.r).contains(&color.r)
            && (self.min.g..=self.max.g).contains(&color.g)
            && (self.min.b..=self.max.b).contains(&color.b)
    }

    /// Center of the accepted box.
    #[cfg(test)]
    pub fn nominal(&self) -> Rgb {
        let mid = |lo: u8, hi: u8| ((lo as u16 + hi as u16) / 2) as u8;
        Rgb::new(
            mid(self.min.r, self.max.r),
            mid(self.min.g, self.max.g),
            mid(self.min.b, self.max.b),
        )
    }
}

/// A login screen, recognized when every probe matches.
#[derive(Debug, Clone, Copy)]
pub struct ScreenSignature {
    pub name: &'static str,
    pub probes: &'static [PixelProbe],
}

impl ScreenSignature {
    #[cfg(test)]
    pub fn probe_at(&self, at: ClientPoint) -> Option<&PixelProbe> {
        self.probes.iter().find(|p| p.at == at)
    }
}

/// What to do once a screen is recognized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScreenAction {
    DoubleClick(ClientPoint),
    PressKey(VirtualKey),
}

// Server list: navy list panel under the gold title strip.
pub const SERVER_SELECT: ScreenSignature = ScreenSignature {
    name: "server select",
    probes: &[
        PixelProbe {
            name: "title strip",
            at: ClientPoint::new(400, 92),
            min: Rgb::new(180, 140, 20),
            max: Rgb::new(255, 200, 80),
        },
        PixelProbe {
            name: "list panel",
            at: ClientPoint::new(400, 250),
            min: Rgb::new(10, 20, 70),
            max: Rgb::new(40, 60, 130),
        },
    ],
};

/// First entry of the server list.
pub const SERVER_ENTRY: ClientPoint = ClientPoint::new(400, 180);

// Character select: bronze slot frame, red start button, black backdrop.
pub const CHARACTER_SELECT: ScreenSignature = ScreenSignature {
    name: "character select",
    probes: &[
        PixelProbe {
            name: "slot frame",
            at: ClientPoint::new(120, 180),
            min: Rgb::new(90, 60, 20),
            max: Rgb::new(140, 100, 50),
        },
        PixelProbe {
            name: "start button",
            at: ClientPoint::new(400, 540),
            min: Rgb::new(150, 20, 10),
            max: Rgb::new(220, 60, 40),
        },
        PixelProbe {
            name: "backdrop",
            at: ClientPoint::new(700, 40),
            min: Rgb::new(0, 0, 0),
            max: Rgb::new(25, 25, 25),
        },
    ],
};

/// First character slot.
pub const CHARACTER_SLOT: ClientPoint = ClientPoint::new(120, 200);

// In game: minimap border and health bar are drawn once the map is loaded.
pub const MAP_LOADED: ScreenSignature = ScreenSignature {
    name: "map loaded",
    probes: &[
        PixelProbe {
            name: "minimap border",
            at: ClientPoint::new(740, 60),
            min: Rgb::new(200, 200, 170),
            max: Rgb::new(255, 255, 230),
        },
        PixelProbe {
            name: "health bar",
            at: ClientPoint::new(60, 20),
            min: Rgb::new(170, 0, 0),
            max: Rgb::new(255, 50, 50),
        },
    ],
};

/// Hotkey that switches on the client's built-in auto-play.
pub const AUTOMATION_TOGGLE_KEY: VirtualKey = VirtualKey(0x7B); // F12
