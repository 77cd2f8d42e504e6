//! Decoding of the fixed 512-byte pages an ATA device returns.
//!
//! Layouts follow ATA8-ACS: section 7.16 for the IDENTIFY DEVICE page and
//! section 7.53.6 / table 55 for the SMART attribute page. Devices report
//! multi-byte fields in their own native order, which in practice matches
//! the host on every platform this runs on; the decoders still take the
//! order as an explicit parameter, resolved once at startup, so the decode
//! path itself stays order-agnostic and testable with both orders.

pub mod raw;

/// Word order used to reassemble 16-bit fields from a page buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteOrder {
    Little,
    Big,
}

impl ByteOrder {
    /// The host's own order, which is what devices report in.
    pub fn host() -> Self {
        if cfg!(target_endian = "big") {
            ByteOrder::Big
        } else {
            ByteOrder::Little
        }
    }

    fn read_u16(self, bytes: &[u8]) -> u16 {
        match self {
            ByteOrder::Little => u16::from_le_bytes([bytes[0], bytes[1]]),
            ByteOrder::Big => u16::from_be_bytes([bytes[0], bytes[1]]),
        }
    }
}

/// A response buffer was shorter than the fixed structure it should hold.
///
/// This is an invariant violation on the part of the caller (the transport
/// always allocates full pages), not an expected runtime condition.
#[derive(Debug, thiserror::Error)]
#[error("page truncated: got {got} bytes, need {need}")]
pub struct DecodeError {
    pub got: usize,
    pub need: usize,
}

/// Size of the IDENTIFY DEVICE response.
pub const IDENTIFY_PAGE_LEN: usize = 512;

/// Bytes of the SMART READ DATA response actually covered by the version
/// word and the attribute table: 2 + 30 * 12.
pub const SMART_PAGE_LEN: usize = 362;

/// Number of attribute slots in a SMART page, fixed by the wire format.
pub const SMART_ATTR_COUNT: usize = 30;

const SERIAL_RANGE: std::ops::Range<usize> = 20..40; // words 10-19
const MODEL_RANGE: std::ops::Range<usize> = 54..94; // words 27-46

/// Word 85 is "features enabled"; bit 0 is the SMART feature set.
const FEATURES_WORD: usize = 85;

/// 512-byte device identification snapshot.
#[derive(Debug)]
pub struct IdentifyPage {
    bytes: [u8; IDENTIFY_PAGE_LEN],
    order: ByteOrder,
}

impl IdentifyPage {
    pub fn parse(buf: &[u8], order: ByteOrder) -> Result<Self, DecodeError> {
        let bytes: [u8; IDENTIFY_PAGE_LEN] =
            buf.get(..IDENTIFY_PAGE_LEN)
                .and_then(|b| b.try_into().ok())
                .ok_or(DecodeError {
                    got: buf.len(),
                    need: IDENTIFY_PAGE_LEN,
                })?;
        Ok(Self { bytes, order })
    }

    /// One of the 256 16-bit identify words.
    pub fn word(&self, index: usize) -> u16 {
        self.order.read_u16(&self.bytes[index * 2..])
    }

    /// Whether the SMART feature set is enabled on this device.
    pub fn smart_supported(&self) -> bool {
        self.word(FEATURES_WORD) & 1 == 1
    }

    /// Model number, words 27-46, trimmed.
    pub fn model(&self) -> String {
        ata_string(&self.bytes[MODEL_RANGE])
    }

    /// Serial number, words 10-19, trimmed.
    pub fn serial(&self) -> String {
        ata_string(&self.bytes[SERIAL_RANGE])
    }
}

/// Decodes an ATA identify string field.
///
/// ATA strings put the first character of each pair in the high byte of a
/// word, so as transmitted every two bytes are swapped. Fields are padded
/// with spaces (sometimes NULs) that carry no information.
fn ata_string(field: &[u8]) -> String {
    let mut out = String::with_capacity(field.len());
    for pair in field.chunks_exact(2) {
        out.push(char::from(pair[1]));
        out.push(char::from(pair[0]));
    }
    out.trim_matches([' ', '\0'].as_slice()).to_owned()
}

/// Individual SMART attribute (12 bytes on the wire).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SmartAttr {
    /// Attribute id; 0 marks an unused table slot.
    pub id: u8,
    pub flags: u16,
    /// Normalised value.
    pub value: u8,
    /// Worst value seen over the device lifetime.
    pub worst: u8,
    /// Vendor-specific (and sometimes device-specific) data.
    pub vendor_bytes: [u8; 6],
    pub reserved: u8,
}

const SMART_ATTR_LEN: usize = 12;

impl SmartAttr {
    fn parse(buf: &[u8], order: ByteOrder) -> Self {
        Self {
            id: buf[0],
            flags: order.read_u16(&buf[1..]),
            value: buf[3],
            worst: buf[4],
            vendor_bytes: buf[5..11].try_into().unwrap_or_default(),
            reserved: buf[11],
        }
    }
}

/// Page of 30 SMART attributes as per the ATA spec.
#[derive(Debug)]
pub struct SmartPage {
    pub version: u16,
    pub attrs: [SmartAttr; SMART_ATTR_COUNT],
}

impl SmartPage {
    /// Decodes the attribute table from a SMART READ DATA response.
    ///
    /// Slots with id 0 are padding and stay in the table; it is the
    /// caller's job to skip them. There is no partial-page decoding.
    pub fn parse(buf: &[u8], order: ByteOrder) -> Result<Self, DecodeError> {
        if buf.len() < SMART_PAGE_LEN {
            return Err(DecodeError {
                got: buf.len(),
                need: SMART_PAGE_LEN,
            });
        }

        let version = order.read_u16(buf);
        let mut attrs = [SmartAttr::default(); SMART_ATTR_COUNT];
        for (slot, attr) in attrs.iter_mut().enumerate() {
            *attr = SmartAttr::parse(&buf[2 + slot * SMART_ATTR_LEN..], order);
        }

        Ok(Self { version, attrs })
    }
}

/// SMART log address 00h. Not exercised by the collection pipeline yet;
/// kept for log-directory support.
#[allow(dead_code)]
pub struct SmartLogDirectory {
    pub version: u16,
    /// Number of pages at each of the 255 log addresses.
    pub num_pages: [u8; 255],
}

/// SMART log address 01h. Not exercised by the collection pipeline yet.
#[allow(dead_code)]
pub struct SmartSummaryErrorLog {
    pub version: u8,
    pub log_index: u8,
    pub log_data: [[u8; 90]; 5],
    /// Device error count.
    pub error_count: u16,
    /// Two's complement checksum of the first 511 bytes.
    pub checksum: u8,
}

/// One entry of SMART log address 06h. Not exercised by the collection
/// pipeline yet.
#[allow(dead_code)]
pub struct SmartSelfTestEntry {
    /// Content of the LBA field (7:0) when the subcommand was issued.
    pub lba_7: u8,
    /// Self-test execution status.
    pub status: u8,
    /// Power-on lifetime of the device in hours at completion.
    pub life_timestamp: u16,
    pub checkpoint: u8,
    /// LBA of first error (28-bit addressing).
    pub lba: u32,
    pub vendor_specific: [u8; 15],
}

/// SMART log address 06h. Not exercised by the collection pipeline yet.
#[allow(dead_code)]
pub struct SmartSelfTestLog {
    pub version: u16,
    pub entries: [SmartSelfTestEntry; 21],
    pub vendor_specific: u16,
    pub index: u8,
    /// Two's complement checksum of the first 511 bytes.
    pub checksum: u8,
}
