use bitflags::bitflags;

bitflags! {
    /// MTTS capability bits reported in the third terminal-type round.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct MttsFlags: u32 {
        const ANSI = 1;
        const VT100 = 2;
        const UTF8 = 4;
        const COLORS_256 = 8;
        const MOUSE_TRACKING = 16;
        const OSC_COLOR_PALETTE = 32;
        const SCREEN_READER = 64;
        const PROXY = 128;
        const TRUECOLOR = 256;
        const MNES = 512;
        const MSLP = 1024;
        const SSL = 2048;
    }
}

impl MttsFlags {
    /// What this client advertises: UTF-8, ANSI color, 256 colors.
    pub const ADVERTISED: MttsFlags = MttsFlags::ANSI
        .union(MttsFlags::UTF8)
        .union(MttsFlags::COLORS_256);

    /// The textual token sent on the wire, e.g. `MTTS 13`.
    pub fn token(self) -> String {
        format!("MTTS {}", self.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advertised_value() {
        assert_eq!(MttsFlags::ADVERTISED.bits(), 13);
        assert_eq!(MttsFlags::ADVERTISED.token(), "MTTS 13");
    }
}
