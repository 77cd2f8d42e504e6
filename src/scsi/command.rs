//! ATA PASS-THROUGH command construction.
//!
//! ATA devices behind a SCSI transport are driven by wrapping the ATA
//! register values inside a SCSI CDB, as described in "SCSI / ATA
//! Translation - 3 (SAT-3)" section 13.2.3, table 195 (the 16-byte
//! variant). The transport never interprets the wrapped command; it just
//! ferries the register values to the device and the data back.
//!
//! Commands are exposed as functions returning a [`CommandBlock`], which
//! wrap the more granular [`AtaPassthrough16`] descriptor.

/// ATA PASS-THROUGH(16) operation code (SAT-3 13.2.3).
const SCSI_ATA_PASSTHROUGH_16: u8 = 0x85;

/// PIO Data-In protocol, placed in bits 4:1 of CDB byte 1 (SAT-3 table
/// 196: protocol 4 = PIO Data-In).
const PROTOCOL_PIO_DATA_IN: u8 = 4 << 1;

/// T_LENGTH = 2: transfer length is in the SECTOR COUNT field.
const T_LENGTH_IN_SECTOR_COUNT: u8 = 0x02;
/// BYT_BLOK = 1: transfer length counts blocks, not bytes.
const BYT_BLOK_BLOCKS: u8 = 1 << 2;
/// T_DIR = 1: transfer is from the device to the host.
const T_DIR_FROM_DEV: u8 = 1 << 3;

/// IDENTIFY DEVICE (ATA8-ACS 7.16).
const ATA_IDENTIFY_DEVICE: u8 = 0xec;
/// SMART (ATA8-ACS 7.53); the subcommand goes in the FEATURE register.
const ATA_SMART: u8 = 0xb0;

/// SMART READ DATA feature register value (ATA8-ACS 7.53.6).
const SMART_READ_DATA: u8 = 0xd0;

/// Every SMART subcommand requires the signature values 4Fh/C2h in the
/// LBA Mid/High registers; the device rejects the command without them
/// (ATA8-ACS 7.53.1).
const SMART_LBA_MID_SIGNATURE: u8 = 0x4f;
const SMART_LBA_HIGH_SIGNATURE: u8 = 0xc2;

/// A serialized 16-byte command block ready to be submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandBlock {
    bytes: [u8; 16],
}

impl CommandBlock {
    /// Returns the length of the underlying command block.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

/// ATA PASS-THROUGH(16) CDB layout, SAT-3 table 195.
///
/// Each two-byte register field is `[ext, low]`: the high byte is the
/// "previous" register content used by 48-bit commands, the low byte is
/// the current register value. SMART only ever uses the low bytes.
#[repr(C, packed)]
struct AtaPassthrough16 {
    /// Always [`SCSI_ATA_PASSTHROUGH_16`].
    operation_code: u8,
    /// MULTIPLE_COUNT (7:5), PROTOCOL (4:1), EXTEND (0).
    protocol: u8,
    /// OFF_LINE (7:6), CK_COND (5), T_DIR (3), BYT_BLOK (2), T_LENGTH (1:0).
    transfer_control: u8,
    /// ATA FEATURE register.
    features: [u8; 2],
    /// ATA SECTOR COUNT register.
    sector_count: [u8; 2],
    /// ATA LBA Low register.
    lba_low: [u8; 2],
    /// ATA LBA Mid register.
    lba_mid: [u8; 2],
    /// ATA LBA High register.
    lba_high: [u8; 2],
    /// ATA DEVICE register.
    device: u8,
    /// ATA COMMAND register.
    command: u8,
    /// Set to zero by most modern implementations.
    control: u8,
}

impl AtaPassthrough16 {
    fn into_block(self) -> CommandBlock {
        const {
            assert!(
                std::mem::size_of::<AtaPassthrough16>() == 16,
                "AtaPassthrough16 not 16 bytes in size"
            );
        };
        // SAFETY: the const assertion above guarantees the descriptor is
        // exactly 16 bytes, it is repr(C, packed), and every field is a
        // plain byte type.
        let bytes: [u8; 16] = unsafe { std::mem::transmute(self) };
        CommandBlock { bytes }
    }
}

/// Builds an IDENTIFY DEVICE command wrapped for SCSI passthrough.
///
/// The device answers with its 512-byte identification page: model and
/// serial strings, feature support words, geometry.
pub fn identify() -> CommandBlock {
    AtaPassthrough16 {
        operation_code: SCSI_ATA_PASSTHROUGH_16,
        protocol: PROTOCOL_PIO_DATA_IN,
        transfer_control: T_DIR_FROM_DEV | BYT_BLOK_BLOCKS | T_LENGTH_IN_SECTOR_COUNT,
        features: [0, 0],
        sector_count: [0, 1],
        lba_low: [0, 0],
        lba_mid: [0, 0],
        lba_high: [0, 0],
        device: 0,
        command: ATA_IDENTIFY_DEVICE,
        control: 0,
    }
    .into_block()
}

/// Builds a SMART READ DATA command wrapped for SCSI passthrough.
///
/// The device answers with its 512-byte attribute page; only the first
/// 362 bytes carry the version word and attribute table.
pub fn smart_read_data() -> CommandBlock {
    AtaPassthrough16 {
        operation_code: SCSI_ATA_PASSTHROUGH_16,
        protocol: PROTOCOL_PIO_DATA_IN,
        transfer_control: T_DIR_FROM_DEV | BYT_BLOK_BLOCKS | T_LENGTH_IN_SECTOR_COUNT,
        features: [0, SMART_READ_DATA],
        sector_count: [0, 0],
        lba_low: [0, 0],
        lba_mid: [0, SMART_LBA_MID_SIGNATURE],
        lba_high: [0, SMART_LBA_HIGH_SIGNATURE],
        device: 0,
        command: ATA_SMART,
        control: 0,
    }
    .into_block()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn smart_read_data_register_bytes() {
        let cdb = smart_read_data();
        let bytes = cdb.as_bytes();
        assert_eq!(cdb.len(), 16);
        assert_eq!(bytes[0], 0x85);
        assert_eq!(bytes[1], 0x08); // PIO data-in
        assert_eq!(bytes[2], 0x0e); // T_DIR | BYT_BLOK | T_LENGTH
        assert_eq!(bytes[4], 0xd0); // SMART READ DATA feature
        assert_eq!(bytes[10], 0x4f); // LBA mid signature
        assert_eq!(bytes[12], 0xc2); // LBA high signature
        assert_eq!(bytes[14], 0xb0); // SMART
        assert_eq!(bytes[15], 0x00);
    }

    #[test]
    fn identify_register_bytes() {
        let cdb = identify();
        let bytes = cdb.as_bytes();
        assert_eq!(bytes[0], 0x85);
        assert_eq!(bytes[1], 0x08);
        assert_eq!(bytes[2], 0x0e);
        assert_eq!(bytes[6], 0x01); // one sector
        assert_eq!(bytes[14], 0xec);
    }

    #[test]
    fn builders_are_deterministic() {
        assert_eq!(smart_read_data(), smart_read_data());
        assert_eq!(identify(), identify());
    }
}
