// SPDX-License-Identifier: MIT
// Copyright (c) 2024 Takashi Sakamoto

//! Common Isochronous Packet header used by AMDTP streams.
//!
//! The module includes structure and conversions for the two-quadlet CIP
//! header that precedes every AMDTP isochronous packet payload.

/// `fmt` field value for AMDTP (Audio and Music Data Transfer Protocol).
pub const FMT_AMDTP: u8 = 0x10;

/// `syt` field value meaning "no timestamp present".
pub const SYT_NO_INFO: u16 = 0xffff;

/// `fdf` field value meaning "no format information".
pub const FDF_NO_INFO: u8 = 0xff;

/// The two-quadlet CIP header preceding an AMDTP packet payload.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Default)]
pub struct CipHeader {
    /// Source node ID, 6 bits.
    pub sid: u8,
    /// Data block size in quadlets (cluster width), 8 bits.
    pub dbs: u8,
    /// Fraction number, 2 bits.
    pub fn_val: u8,
    /// Quadlet padding count, 3 bits.
    pub qpc: u8,
    /// Source packet header flag.
    pub sph: bool,
    /// Data block counter, 8 bits, increments by events-per-packet mod 256.
    pub dbc: u8,
    /// Format field, 6 bits. `FMT_AMDTP` for AMDTP streams.
    pub fmt: u8,
    /// Format-dependent field, 8 bits.
    pub fdf: u8,
    /// Timestamp field: cycle-relative offset, or `SYT_NO_INFO`.
    pub syt: u16,
}

impl CipHeader {
    const SID_SHIFT: u32 = 26;
    const SID_MASK: u32 = 0x3f;

    const DBS_SHIFT: u32 = 16;
    const DBS_MASK: u32 = 0xff;

    const FN_SHIFT: u32 = 14;
    const FN_MASK: u32 = 0x03;

    const QPC_SHIFT: u32 = 11;
    const QPC_MASK: u32 = 0x07;

    const SPH_SHIFT: u32 = 10;
    const SPH_MASK: u32 = 0x01;

    const DBC_SHIFT: u32 = 0;
    const DBC_MASK: u32 = 0xff;

    const FMT_SHIFT: u32 = 26;
    const FMT_MASK: u32 = 0x3f;

    const FDF_SHIFT: u32 = 16;
    const FDF_MASK: u32 = 0xff;

    const SYT_SHIFT: u32 = 0;
    const SYT_MASK: u32 = 0xffff;

    /// Decode from the two quadlets as they appear on the wire, in host byte
    /// order (the transport is assumed to have already converted from
    /// network byte order).
    pub fn parse(quadlets: [u32; 2]) -> Self {
        let q0 = quadlets[0];
        let q1 = quadlets[1];
        CipHeader {
            sid: ((q0 >> Self::SID_SHIFT) & Self::SID_MASK) as u8,
            dbs: ((q0 >> Self::DBS_SHIFT) & Self::DBS_MASK) as u8,
            fn_val: ((q0 >> Self::FN_SHIFT) & Self::FN_MASK) as u8,
            qpc: ((q0 >> Self::QPC_SHIFT) & Self::QPC_MASK) as u8,
            sph: ((q0 >> Self::SPH_SHIFT) & Self::SPH_MASK) != 0,
            dbc: ((q0 >> Self::DBC_SHIFT) & Self::DBC_MASK) as u8,
            fmt: ((q1 >> Self::FMT_SHIFT) & Self::FMT_MASK) as u8,
            fdf: ((q1 >> Self::FDF_SHIFT) & Self::FDF_MASK) as u8,
            syt: ((q1 >> Self::SYT_SHIFT) & Self::SYT_MASK) as u16,
        }
    }

    /// Encode into the two wire quadlets.
    pub fn build(&self) -> [u32; 2] {
        let q0 = ((self.sid as u32 & Self::SID_MASK) << Self::SID_SHIFT)
            | ((self.dbs as u32 & Self::DBS_MASK) << Self::DBS_SHIFT)
            | ((self.fn_val as u32 & Self::FN_MASK) << Self::FN_SHIFT)
            | ((self.qpc as u32 & Self::QPC_MASK) << Self::QPC_SHIFT)
            | ((self.sph as u32 & Self::SPH_MASK) << Self::SPH_SHIFT)
            | ((self.dbc as u32 & Self::DBC_MASK) << Self::DBC_SHIFT);
        let q1 = ((self.fmt as u32 & Self::FMT_MASK) << Self::FMT_SHIFT)
            | (0b10 << 24)
            | ((self.fdf as u32 & Self::FDF_MASK) << Self::FDF_SHIFT)
            | ((self.syt as u32 & Self::SYT_MASK) << Self::SYT_SHIFT);
        [q0, q1]
    }

    /// Whether the header carries a usable timestamp.
    pub fn has_syt(&self) -> bool {
        self.syt != SYT_NO_INFO
    }

    /// Whether the header carries usable format-dependent information.
    pub fn has_fdf(&self) -> bool {
        self.fdf != FDF_NO_INFO
    }

    /// Whether the header matches the AMDTP format and is otherwise
    /// structurally valid for a data-carrying packet, per spec.md §4.4.
    pub fn is_valid_amdtp_data_packet(&self) -> bool {
        self.has_syt() && self.has_fdf() && self.fmt == FMT_AMDTP && self.dbs > 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = CipHeader {
            sid: 0x3f,
            dbs: 8,
            fn_val: 2,
            qpc: 5,
            sph: true,
            dbc: 200,
            fmt: FMT_AMDTP,
            fdf: 0x02,
            syt: 0x1234,
        };
        let quadlets = header.build();
        assert_eq!(CipHeader::parse(quadlets), header);
    }

    #[test]
    fn no_info_sentinels_are_recognized() {
        let header = CipHeader {
            syt: SYT_NO_INFO,
            fdf: FDF_NO_INFO,
            ..Default::default()
        };
        assert!(!header.has_syt());
        assert!(!header.has_fdf());
    }
}
