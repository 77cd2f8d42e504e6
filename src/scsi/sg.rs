//! The Linux SCSI Generic (sg) driver ioctl ABI.
//!
//! The sg driver lets userspace hand a fully-formed CDB to any SCSI-capable
//! block device and get the response buffer back, without the kernel
//! interpreting the command. The interface is documented in
//! <http://sg.danny.cz/sg/p/sg_v3_ho.html> and defined in `<scsi/sg.h>`.
//!
//! Everything in this file mirrors that kernel header. Field order and
//! widths are ABI, not style: the kernel reads this struct straight out of
//! our address space, so any deviation silently corrupts the request.

use std::fmt;

/// `SG_IO`: issue one command and wait for its completion.
pub const SG_IO: libc::c_ulong = 0x2285;

/// `interface_id` must always be `'S'` for the sg v3 interface.
pub const SG_INTERFACE_ID_ORIG: i32 = 'S' as i32;

/// Data transfer direction, from `<scsi/sg.h>`. Every command this
/// exporter issues reads from the device.
pub const SG_DXFER_FROM_DEV: i32 = -3;

/// The low bit of `info` is the OK/abnormal flag; everything else in the
/// bitmask is auxiliary detail.
pub const SG_INFO_OK_MASK: u32 = 0x1;
pub const SG_INFO_OK: u32 = 0x0;

/// Per-command timeout handed to the driver, in milliseconds. A hung
/// device is bounded by this rather than blocking a scan forever.
pub const DEFAULT_TIMEOUT_MS: u32 = 2000;

/// Fixed sense buffer allocation. 32 bytes is enough for fixed-format
/// sense data, which is all ATA passthrough ever returns.
pub const SENSE_BUF_LEN: usize = 32;

/// `sg_io_hdr_t` from `<scsi/sg.h>`.
///
/// The three pointers reference caller-owned buffers (data, CDB, sense)
/// that must stay alive and pinned for the duration of the ioctl. The
/// struct is only ever built, passed to one `ioctl(2)`, and read back
/// inside [`super::SgDevice::send_cdb`]; it never escapes that function.
#[repr(C)]
pub struct SgIoHdr {
    /// 'S' for SCSI generic (required)
    pub interface_id: i32,
    /// data transfer direction, one of the `SG_DXFER_*` values
    pub dxfer_direction: i32,
    /// SCSI command length (<= 16 bytes)
    pub cmd_len: u8,
    /// max length to write to `sbp`
    pub mx_sb_len: u8,
    /// 0 implies no scatter gather
    pub iovec_count: u16,
    /// byte count of data transfer
    pub dxfer_len: u32,
    /// points to data transfer memory or scatter gather list
    pub dxferp: *mut u8,
    /// points to command to perform
    pub cmdp: *const u8,
    /// points to sense_buffer memory
    pub sbp: *mut u8,
    /// MAX_UINT -> no timeout (unit: millisec)
    pub timeout: u32,
    /// 0 -> default, see SG_FLAG...
    pub flags: u32,
    /// unused internally (normally)
    pub pack_id: i32,
    /// unused internally
    pub usr_ptr: *mut u8,
    /// SCSI status
    pub status: u8,
    /// shifted, masked scsi status
    pub masked_status: u8,
    /// messaging level data (optional)
    pub msg_status: u8,
    /// byte count actually written to `sbp`
    pub sb_len_wr: u8,
    /// errors from host adapter
    pub host_status: u16,
    /// errors from software driver
    pub driver_status: u16,
    /// dxfer_len - actual_transferred
    pub resid: i32,
    /// time taken by cmd (unit: millisec)
    pub duration: u32,
    /// auxiliary information
    pub info: u32,
}

/// Sense data captured from a failed command.
///
/// The driver tells us how many bytes it actually wrote via `sb_len_wr`,
/// so we keep the full allocation plus that length rather than guessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SenseData {
    buf: [u8; SENSE_BUF_LEN],
    len: u8,
}

impl SenseData {
    pub fn captured(buf: &[u8; SENSE_BUF_LEN], len: u8) -> Self {
        Self { buf: *buf, len }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..usize::from(self.len).min(SENSE_BUF_LEN)]
    }

    /// Fixed-format sense key / additional sense code / qualifier, when the
    /// response is long enough to carry them (SPC-4 table 53, response
    /// codes 70h/71h).
    pub fn key_asc_ascq(&self) -> Option<(u8, u8, u8)> {
        let bytes = self.as_bytes();
        if bytes.len() < 14 || bytes[0] & 0x7e != 0x70 {
            return None;
        }
        Some((bytes[2] & 0x0f, bytes[12], bytes[13]))
    }
}

impl fmt::Display for SenseData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.key_asc_ascq() {
            Some((key, asc, ascq)) => write!(
                f,
                ", sense key: {key:#04x}, asc/ascq: {asc:#04x}/{ascq:#04x}"
            ),
            None => Ok(()),
        }
    }
}

/// Failure of one passthrough command.
///
/// `Ioctl` means the syscall itself failed (node missing, permission
/// denied, not an sg-capable device); `Command` means the driver ran the
/// command but the completion info reported something other than OK.
/// SCSI status codes are listed at <http://www.t10.org/lists/2status.htm>.
#[derive(Debug, thiserror::Error)]
pub enum SgioError {
    #[error("SG_IO ioctl failed: {0}")]
    Ioctl(#[from] std::io::Error),
    #[error(
        "SCSI status: {status:#04x}, host status: {host_status:#04x}, \
         driver status: {driver_status:#04x}{sense}"
    )]
    Command {
        status: u8,
        host_status: u16,
        driver_status: u16,
        sense: SenseData,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sense_key_parses_from_fixed_format() {
        let mut buf = [0u8; SENSE_BUF_LEN];
        buf[0] = 0x70; // current, fixed format
        buf[2] = 0x05; // ILLEGAL REQUEST
        buf[12] = 0x24; // INVALID FIELD IN CDB
        buf[13] = 0x00;
        let sense = SenseData::captured(&buf, 18);
        assert_eq!(sense.key_asc_ascq(), Some((0x05, 0x24, 0x00)));
    }

    #[test]
    fn empty_sense_renders_nothing() {
        let sense = SenseData::captured(&[0u8; SENSE_BUF_LEN], 0);
        assert!(sense.key_asc_ascq().is_none());
        assert_eq!(sense.to_string(), "");
    }

    #[test]
    fn command_error_formats_status_codes() {
        let err = SgioError::Command {
            status: 0x02,
            host_status: 0x07,
            driver_status: 0x08,
            sense: SenseData::captured(&[0u8; SENSE_BUF_LEN], 0),
        };
        assert_eq!(
            err.to_string(),
            "SCSI status: 0x02, host status: 0x07, driver status: 0x08"
        );
    }
}
