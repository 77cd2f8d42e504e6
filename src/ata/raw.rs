//! Reconstruction of vendor-encoded raw attribute values.
//!
//! The six vendor bytes of an attribute have no universal meaning; the
//! drive database assigns each (model, attribute) pair a short conversion
//! tag naming the rule that turns them into hours, degrees or counts. The
//! vocabulary here matches what smartmontools' drivedb uses, including the
//! infamous `tempminmax` heuristic that probes several vendor-specific
//! packings of a current/min/max temperature triplet.
//!
//! Every rule is a pure function of the attribute record. [`UNDECODABLE`]
//! is the single shared "no meaningful value" signal; callers must not
//! publish a raw metric when they see it.

use crate::ata::SmartAttr;

/// Sentinel returned when a raw value cannot be meaningfully decoded.
pub const UNDECODABLE: f64 = -1.0;

impl SmartAttr {
    /// Reassembles the vendor bytes into a single accumulator in the byte
    /// order the conversion rule calls for.
    ///
    /// Most rules read the six vendor bytes low-to-high. The wide and hex
    /// variants widen the value with the reserved byte, or with the worst
    /// and normalised value bytes, as extra high-order bytes.
    pub fn vendor_value(&self, conv: &str) -> u64 {
        let byte_order: &[u8] = match conv {
            "raw64" | "hex64" => b"543210wv",
            "raw56" | "hex56" | "raw24/raw32" | "msec24hour32" => b"r543210",
            _ => b"543210",
        };

        let mut acc: u64 = 0;
        for &sel in byte_order {
            let b = match sel {
                b'0'..=b'5' => self.vendor_bytes[usize::from(sel - b'0')],
                b'r' => self.reserved,
                b'v' => self.value,
                b'w' => self.worst,
                _ => 0,
            };
            acc = (acc << 8) | u64::from(b);
        }
        acc
    }

    /// Converts the raw attribute payload to a single value according to
    /// the conversion rule, usually taken from the drive database.
    ///
    /// Returns [`UNDECODABLE`] for rules that have no single-value
    /// representation, for unrecognized rules, and when the temperature
    /// heuristic rejects every known packing.
    pub fn raw_value(&self, conv: &str) -> f64 {
        let v = self.vendor_value(conv);

        // Byte and word views of the low 48 bits, for the shape-dependent
        // rules below.
        let mut raw = [0u8; 6];
        for (i, b) in raw.iter_mut().enumerate() {
            *b = (v >> (i * 8)) as u8;
        }
        let mut word = [0u16; 3];
        for (i, w) in word.iter_mut().enumerate() {
            *w = (v >> (i * 16)) as u16;
        }

        match conv {
            "raw8" => UNDECODABLE,
            "raw16" => f64::from(word[2]),
            "raw48" | "raw56" | "raw64" | "hex48" | "hex56" | "hex64" => v as f64,
            "raw16(raw16)" | "raw16(avg16)" => f64::from(word[0]),
            "raw24(raw8)" => (v & 0x00ff_ffff) as f64,
            "raw24/raw24" => (v >> 24) as f64,
            "raw24/raw32" => (v >> 32) as f64,
            "min2hour" => (u64::from(word[0]) + (u64::from(word[1]) << 16)) as f64 / 60.0,
            "sec2hour" => v as f64 / 3600.0,
            "halfmin2hour" => v as f64 / 120.0,
            "msec24hour32" => {
                // hours + milliseconds
                let hours = v & 0xffff_ffff;
                let milliseconds = v >> 32;
                hours as f64 + milliseconds as f64 / 3_600_000.0
            }
            "tempminmax" => temp_min_max(&raw, &word),
            "temp10x" => f64::from(word[0]) / 10.0,
            _ => UNDECODABLE,
        }
    }
}

/// Classifies a word as a plausible signed temperature.
///
/// Returns a nonzero code describing which widths the word could be (a
/// small non-negative value, a negative byte, a negative word), or zero
/// when it cannot be a temperature at all.
fn check_temp_word(word: u16) -> u8 {
    if word <= 0x7f {
        0x11 // >= 0, signed byte or word
    } else if word <= 0xff {
        0x01 // < 0, signed byte
    } else if word > 0xff80 {
        0x10 // < 0, signed word
    } else {
        0x00
    }
}

/// Orders two bytes as a (lo, hi) temperature range and accepts it only
/// when it brackets the current temperature `t` within -60..=120 degrees
/// and is not the degenerate (-1, <=0) pair some firmware reports.
fn check_temp_range(t: i8, ut1: u8, ut2: u8) -> Option<(i32, i32)> {
    let (mut t1, mut t2) = (ut1 as i8, ut2 as i8);
    if t1 > t2 {
        (t1, t2) = (t2, t1);
    }

    if -60 <= t1 && t1 <= t && t <= t2 && t2 <= 120 && !(t1 == -1 && t2 <= 0) {
        Some((i32::from(t1), i32::from(t2)))
    } else {
        None
    }
}

/// The current/min/max temperature heuristic.
///
/// Vendors pack the triplet in at least five different ways; each arm
/// below tries one packing (comments show the layout, high byte first,
/// TT = current temperature) and the first one that validates wins. When
/// none do, the raw low byte is reported as-is. The exact hypothesis
/// order and the fallback are load-bearing: drives exist that only decode
/// correctly because of it.
fn temp_min_max(raw: &[u8; 6], word: &[u16; 3]) -> f64 {
    let t = raw[0] as i8;
    let ctw0 = check_temp_word(word[0]);

    if word[2] == 0 {
        if word[1] == 0 && ctw0 != 0 {
            // 00 00 00 00 xx TT
            return f64::from(t);
        }
        if ctw0 != 0 && check_temp_range(t, raw[2], raw[3]).is_some() {
            // 00 00 HL LH xx TT
            return f64::from(t);
        }
        if raw[3] == 0 && check_temp_range(t, raw[1], raw[2]).is_some() {
            // 00 00 00 HL LH TT
            return f64::from(t);
        }
    } else if ctw0 != 0 {
        if ctw0 & check_temp_word(word[1]) & check_temp_word(word[2]) != 0
            && check_temp_range(t, raw[2], raw[4]).is_some()
        {
            // xx HL xx LH xx TT
            return f64::from(t);
        }
        if word[2] < 0x7fff
            && matches!(check_temp_range(t, raw[2], raw[3]), Some((_, hi)) if hi >= 40)
        {
            // CC CC HL LH xx TT
            return f64::from(t);
        }
    }

    f64::from(raw[0])
}
